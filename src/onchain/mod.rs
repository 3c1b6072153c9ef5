//! External chain-facing capabilities: the read side (RPC) and the write
//! side (protection broadcast) the core consumes per its external-interface
//! contract.
pub mod broadcast;
pub mod rpc;
