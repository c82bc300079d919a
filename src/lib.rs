//! # Reading Server Library
//!
//! This crate provides the live session engine for a consultation
//! marketplace:
//! - Session orchestration (request, accept/reject, activate, end)
//! - A fault-tolerant signaling relay with push and polling delivery
//! - Per-session connection health monitoring from client heartbeats
//! - A billing loop with exactly-once-per-interval charge semantics
//!
//! ## Architecture
//!
//! The crate follows Clean Architecture principles:
//!
//! - **Domain Layer**: Core business entities and repository traits
//! - **Application Layer**: Business logic services and DTOs
//! - **Runtime Layer**: In-memory live-session state (registry, monitor, ticker)
//! - **Infrastructure Layer**: Database, cache, and metrics implementations
//! - **Presentation Layer**: HTTP handlers and WebSocket gateway
//!
//! ## Module Structure
//!
//! ```text
//! reading_server/
//! +-- config/         Configuration management
//! +-- domain/         Domain entities and repository traits
//! +-- application/    Application services and DTOs
//! +-- runtime/        Session registry, link monitor, billing tick loop
//! +-- infrastructure/ Database, cache, and metrics implementations
//! +-- presentation/   HTTP routes and WebSocket handlers
//! +-- shared/         Common utilities (errors)
//! ```

// Configuration module
pub mod config;

// Domain layer - Core business logic
pub mod domain;

// Application layer - Business services
pub mod application;

// Runtime layer - In-memory live-session state
pub mod runtime;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
