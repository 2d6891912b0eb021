//! User data access layer of a social platform: member identity, profiles,
//! privacy, media, presence, memberships and authentication records over SQL,
//! with a read-through cache in front of every lookup.

pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod repository;
pub mod service;
