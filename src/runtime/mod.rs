pub mod block_store;
pub mod mdb;
pub mod mempool;
pub mod tracker;
