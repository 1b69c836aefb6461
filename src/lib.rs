#[macro_use]
extern crate diesel;

#[macro_use]
extern crate diesel_migrations;

pub mod auth;
pub mod cache;
pub mod config;
pub mod core;
pub mod db;
pub mod directory;
pub mod provider;
pub mod util;
