mod http;
mod store;
#[cfg(test)]
mod testing;

pub mod accumulation;
pub mod chart;
pub mod darkpool;
pub mod gex;
pub mod memory;
pub mod pine_seeds;
pub mod ticker;

pub use accumulation::AccumulationTracker;
pub use darkpool::DarkPoolService;
pub use gex::GexService;
pub use memory::LevelMemory;
pub use pine_seeds::PineSeeds;
pub use store::{FileStore, KeyLocks, KvStore, RedisStore, store_from_env};
