pub mod aggregator;
pub mod beam_search;
pub mod engine;
pub mod service;

pub mod proto {
    tonic::include_proto!("translation");
}
