pub mod aggregate;
pub mod cohort;
pub mod config;
pub mod error;
pub mod event;
pub mod flow;
pub mod geocode;
pub mod histogram;
pub mod outcome;
pub mod pipeline;
pub mod record;
pub mod reference;
pub mod report;
pub mod spatial;
pub mod store;
pub mod types;
