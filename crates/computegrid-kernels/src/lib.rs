//! Compute kernels for ComputeGrid.
//!
//! Each kernel implements [`DistributedTask`](computegrid_core::DistributedTask)
//! and is exposed through a [`TaskProvider`](computegrid_core::TaskProvider).
//! [`default_registry`] wires every built-in provider into a
//! [`ProviderRegistry`].

pub mod mandelbrot;
pub mod monte_carlo;

use computegrid_core::{Precision, ProviderRegistry, ProviderRegistryBuilder};

pub use mandelbrot::{MandelbrotArgs, MandelbrotProvider, MandelbrotSlice, MANDELBROT};
pub use monte_carlo::{MonteCarloPiProvider, PiArgs, PiEstimate, MONTE_CARLO_PI};

/// Add every built-in provider to `builder`.
pub fn register_builtin(builder: ProviderRegistryBuilder) -> ProviderRegistryBuilder {
    builder
        .register(MandelbrotProvider::new(Precision::Standard))
        .register(MandelbrotProvider::new(Precision::High))
        .register(MonteCarloPiProvider)
}

/// Registry containing every built-in provider.
pub fn default_registry() -> ProviderRegistry {
    register_builtin(ProviderRegistry::builder()).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use computegrid_core::TaskEnvelope;
    use serde_json::json;

    #[test]
    fn test_default_registry_kinds() {
        let registry = default_registry();
        assert_eq!(registry.len(), 3);
        assert!(registry.resolve(MANDELBROT, Some(Precision::High)).is_ok());
        assert!(registry.resolve(MONTE_CARLO_PI, Some(Precision::High)).is_err());
    }

    #[test]
    fn test_envelope_runs_through_registry() {
        let envelope = TaskEnvelope::new(
            MONTE_CARLO_PI,
            Precision::Standard,
            json!({"samples": 1000, "seed": 1}),
        );
        let output = envelope.run(&default_registry()).unwrap();
        assert_eq!(output["samples"], 1000);
    }
}
