use std::time::Instant;

use ::metrics::{
    counter,
    histogram,
};

pub fn log_bulk_chunk(index: &str, ops: u64) {
    counter!("search_bulk_operations_total", "index" => index.to_string()).increment(ops);
}

pub fn log_bulk_failures(index: &str, failures: u64) {
    counter!("search_bulk_failures_total", "index" => index.to_string()).increment(failures);
}

pub fn log_query(index: &str, started: Instant) {
    counter!("search_queries_total", "index" => index.to_string()).increment(1);
    histogram!("search_query_seconds").record(started.elapsed().as_secs_f64());
}

pub fn log_reindex(dataset: &str, outcome: &'static str) {
    counter!("search_reindex_total", "dataset" => dataset.to_string(), "outcome" => outcome)
        .increment(1);
}
