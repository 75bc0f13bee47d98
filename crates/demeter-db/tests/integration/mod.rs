mod common;
mod job_queue_tests;
mod status_tests;
