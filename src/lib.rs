pub mod chain;

pub mod client;

pub mod error;

pub mod ledger;

pub mod matches;

pub mod odds;

pub mod orchestrator;

pub mod rpc;

pub mod session;

pub mod test_helpers;

pub mod types;

pub mod units;
