//! API server state.

use std::sync::Arc;

use crate::facade::ControlPlane;

/// Shared state for the API server.
#[derive(Clone)]
pub struct ApiState {
    pub control_plane: Arc<ControlPlane>,
}

impl ApiState {
    pub fn new(control_plane: ControlPlane) -> Self {
        Self {
            control_plane: Arc::new(control_plane),
        }
    }
}
