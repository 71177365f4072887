//! Road-network ingestion: source seam, Parquet cache, and the derived
//! [`LinkIndex`](index::LinkIndex) (§4.1, §4.2).

pub mod cache;
pub mod index;
pub mod source;
