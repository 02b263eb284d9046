//! Course Port Server
//!
//! Imports course archives uploaded in chunks into a course store and
//! exports stored courses and libraries back out as tarballs.

pub mod access;
pub mod archive;
pub mod config;
pub mod course;
pub mod db;
pub mod error;
pub mod export;
pub mod import;
pub mod routes;
pub mod state;
pub mod store;
pub mod upload;
