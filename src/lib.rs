pub mod decoder;
pub mod enrich;
pub mod fetch;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod quality;
pub mod report;
pub mod sink;
pub mod store;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
