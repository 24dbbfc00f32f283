//! atomic-swap: BTC/ETH hash time-locked swap coordination
//!
//! Secret and Merkle commitment generation, the swap phase machine, the
//! coordinator for simple, limit-order and partial-fill swaps, the
//! Bitcoin-to-Ethereum relayer, swap record persistence and in-memory
//! simulated chains.

pub mod coordinator;
pub mod error;
pub mod merkle;
pub mod partial;
pub mod relayer;
pub mod retry;
pub mod secrets;
pub mod sim;
pub mod state;
pub mod store;

pub use coordinator::{validate_order_id, CoordinatorSettings, SwapCoordinator, SwapRequest};
pub use error::{SwapError, SwapResult};
pub use merkle::MerkleTree;
pub use partial::{
    default_resolvers, ChunkRange, FillLedger, FillRecord, FillStatus, PartialOrder,
    ResolverAssignment,
};
pub use relayer::{RelayStatus, Relayer, WatchInfo, WatchRequest};
pub use sim::{SimulatedBitcoin, SimulatedEthereum};
pub use state::{LegPair, PhaseEvent, RecordedError, SwapPhase, SwapRecord};
pub use store::{FileSwapStore, MemorySwapStore, StoreListing, SwapStore};
