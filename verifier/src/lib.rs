//! Tonlite verification pipeline: collaborator traits, BFT quorum
//! checking, epoch-aware block fetching, transaction location and wire
//! message construction for the on-chain light-client contract.

pub mod configuration;
pub mod locator;
pub mod pipeline;
pub mod quorum;
pub mod source;
pub mod wire;

pub use configuration::LiteClientConfig;
pub use locator::{locate_transaction, TxLocation};
pub use pipeline::{ContractSetupInfo, KeyBlockProof, LiteClient, VerifiedBlock};
pub use quorum::{signing_message, verify_quorum, QuorumResult, BLOCK_SIGNATURE_MAGIC};
pub use source::{BlockCache, BlockSource, NoCache, SignatureSource};
