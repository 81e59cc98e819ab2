pub mod chunking;
pub mod replication;

pub use chunking::{read_file, write_file, ReadResult, WriteResult, CHUNK_SIZE};
pub use replication::replicate_chunk;
