pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod gateway;
pub mod guard;
pub mod hrm;
pub mod importer;
pub mod logging;
pub mod output;
pub mod transfer;
pub mod tree;
pub mod web;
