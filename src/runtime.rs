pub(crate) mod worker_handle;
