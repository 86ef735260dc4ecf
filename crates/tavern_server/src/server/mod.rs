#![forbid(unsafe_code)]

pub mod auth;
pub mod channels;
pub mod connection;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod friends;
pub mod gate;
pub mod health;
pub mod hub;
pub mod registry;
pub mod rooms;
pub mod users;

#[cfg(test)]
mod testkit;


#[cfg(test)]
mod dispatch_tests;

#[cfg(test)]
mod friends_tests;


#[cfg(test)]
mod hub_tests;

#[cfg(test)]
mod registry_tests;
