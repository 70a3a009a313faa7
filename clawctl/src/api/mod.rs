//! HTTP API for claw owners and the provisioning service.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response bodies, kept separate from the store models
//!
//! # API Structure
//!
//! - **Claws** (`/api/v1/claws/*`): create, list, inspect, update and delete claws
//! - **Environment** (`/api/v1/claws/{id}/env`, `/restart`, `/logs`): container management
//! - **Messages** (`/api/v1/claws/{id}/messages/*`): transcript and chat turns, including SSE
//! - **Provisioning** (`/internal/v1/claws/*`): hand-off to the external provisioner
//!
//! The inference gateway (`/llm/v1/messages`) lives in [`crate::gateway`].
//!
//! All owner and provisioner endpoints are annotated with `utoipa`; the rendered
//! documentation is served at `/api/docs`.

pub mod handlers;
pub mod models;
