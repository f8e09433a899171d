//! # codex-core
//!
//! Relationship synchronization for a small typed graph of campaign entities: regions,
//! locations, shops, NPCs and groups.
//!
//! ## Overview
//!
//! Every link between two entities is recorded on both of them. When a UI writes one side of a
//! link (an NPC's `linkedShops`, a location's `parentRegion`, a group's `members`) codex-core
//! writes the other side, enforces the exclusive parent slots of locations and shops, and tells
//! the open views that display any affected entity to refresh.
//!
//! ### Key Features
//!
//! - **Inverse edges**: a fixed relation table pairs every link field with its inverse
//! - **Exclusive parents**: moving a shop or location detaches it from its old container first
//! - **No update storms**: every write the core issues is tagged so it is never reconciled again
//! - **Best-effort fan-out**: one failing inverse write never cancels its siblings
//! - **Coalesced refreshes**: a batch of changes refreshes each affected viewer once
//! - **Deduplicated creation**: repeated "create" triggers in flight produce one entity
//!
//! ## Architecture
//!
//! - **[`properties`]**: node ids, kinds, link fields and per-kind records
//! - **[`relation`]**: the relation table and its exclusivity rules
//! - **[`store`]**: the [`store::EntityStore`] boundary and the in-process [`store::MemoryStore`]
//! - **[`sync`]**: [`sync::LinkSynchronizer`], the two-sided mutation primitive
//! - **[`reconcile`]**: [`reconcile::UpdateReconciler`], which diffs outside writes into deltas
//! - **[`cascade`]**: [`cascade::CascadeScheduler`] and the [`cascade::Viewer`] registry
//! - **[`creation`]**: [`creation::CreationGuard`] and kind-specific defaults
//! - **[`codex`]**: the [`codex::Codex`] facade and event loop
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use codex_core::{codex::Codex, config::CodexConfig, store::MemoryStore};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let codex = Codex::new(Arc::new(MemoryStore::new()), CodexConfig::default());
//!
//!     let region = codex.create_region(Some("Northmarch")).await?.unwrap();
//!     let location = codex.create_location(Some("Harbor")).await?.unwrap();
//!     let shop = codex.create_shop(Some("Salt & Rope")).await?.unwrap();
//!
//!     codex.link_region_to_location(&region, &location).await?;
//!     codex.link_location_to_shop(&location, &shop).await?;
//!
//!     // Refresh every viewer that displays one of the touched nodes.
//!     let report = codex.process_pending().await;
//!     println!("{} nodes affected", report.cascade.affected.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Outside writes
//!
//! Writes issued with [`store::WriteOptions::external`] surface as
//! [`event::EventOrigin::Remote`] mutation events. [`codex::Codex::process_pending`] and
//! [`codex::Codex::run`] diff them and apply the inverse edges; writes the core itself issues
//! surface as [`event::EventOrigin::Local`] and only drive refreshes.

pub mod cascade;
pub mod codex;
pub mod commands;
pub mod config;
pub mod creation;
pub mod error;
pub mod event;
pub mod index;
pub mod properties;
pub mod reconcile;
pub mod relation;
pub mod store;
pub mod sync;

pub use error::*;
