//! Typed facade over the metrics macros so stage code never spells metric
//! names inline.

pub mod pipeline {
    pub fn rows_ingested(n: u64) {
        metrics::counter!("fpi_pipeline_rows_ingested_total").increment(n);
    }

    pub fn rows_rejected(n: u64) {
        metrics::counter!("fpi_pipeline_rows_rejected_total").increment(n);
    }

    pub fn duplicates_removed(n: u64) {
        metrics::counter!("fpi_pipeline_duplicates_removed_total").increment(n);
    }

    pub fn rows_dropped_missing(n: u64) {
        metrics::counter!("fpi_pipeline_rows_dropped_missing_total").increment(n);
    }

    pub fn rows_loaded(n: u64) {
        metrics::counter!("fpi_pipeline_rows_loaded_total").increment(n);
    }

    pub fn stage_duration(stage: &'static str, seconds: f64) {
        metrics::histogram!("fpi_pipeline_stage_duration_seconds", "stage" => stage)
            .record(seconds);
    }
}

pub mod serving {
    pub fn request(endpoint: &'static str) {
        metrics::counter!("fpi_serving_requests_total", "endpoint" => endpoint).increment(1);
    }

    pub fn request_error(endpoint: &'static str, kind: &'static str) {
        metrics::counter!("fpi_serving_request_errors_total", "endpoint" => endpoint, "kind" => kind)
            .increment(1);
    }

    pub fn duration(endpoint: &'static str, seconds: f64) {
        metrics::histogram!("fpi_serving_request_duration_seconds", "endpoint" => endpoint)
            .record(seconds);
    }
}
