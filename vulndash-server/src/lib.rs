//! # Vulndash Server
//!
//! HTTP front end for the vulndash scan engine.
//!
//! - `POST /scan` queues an image for scanning and answers `202 {"ID": ...}`.
//! - `GET /scan/status` and `GET /scan/status/{id}` report job progress.
//! - `GET /summary`, `GET /report/{image}` and `POST /summary/check` serve
//!   cached results.
//! - `GET /health` checks the store.

pub mod handlers;
pub mod infra;
pub mod routes;
pub mod webhook;
