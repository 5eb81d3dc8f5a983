//! Data-acquisition and process-control library for a laboratory gas
//! analyzer.
//!
//! Shared by the two binaries in this crate:
//!
//! - `daq_server` — Serial Transport, DAQ Worker, Sample Ring, Query
//!   Engine, Command Service, Data Service, Sensor Catalog.
//! - `hmc_master` — Process Controller, driving the above over TCP while
//!   owning the actuator's serial link directly.

pub mod command_service;
pub mod config;
pub mod daq_worker;
pub mod data_service;
pub mod error;
pub mod process_controller;
pub mod query;
pub mod ring;
pub mod sensor;
pub mod serial_transport;
pub mod validation;
