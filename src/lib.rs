pub mod app;
pub mod config;
pub mod domain;
pub mod download;
pub mod error;
pub mod fs_util;
pub mod geography;
pub mod join;
pub mod output;
pub mod population;
pub mod reference;
pub mod store;
pub mod survey;
