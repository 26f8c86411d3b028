//! # Web API Handlers

pub mod health;
