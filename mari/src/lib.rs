//! Mari: a TDMA radio layer for short-range star topologies.
//!
//! A single gateway owns a channel-hopping slotted timeline. It beacons,
//! admits nodes into dedicated uplink cells, tracks their liveness and
//! forwards application payloads toward a host. Nodes scan for beacons,
//! synchronize to the gateway's absolute slot number, contend for a cell in
//! the shared uplink window and then speak only in their own cell.
//!
//! The protocol is driven by a single periodic timer: [`mac::Mac::tick`]
//! executes exactly one slot. Everything above the PHY is synchronous; the
//! radio and RNG peripherals are reached through the [`phy::Radio`] and
//! [`rand_core::RngCore`] contracts.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[macro_use]
pub(crate) mod utils;

pub mod association;
pub mod bloom;
pub mod config;
pub mod event;
pub mod ipc;
pub mod mac;
pub mod phy;
pub mod queue;
pub mod schedule;
pub mod scheduler;
pub mod time;

pub use mari_frame as frame;
