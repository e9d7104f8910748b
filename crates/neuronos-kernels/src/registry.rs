//! Backend registry and capability-gated selection.
//!
//! Registration takes `&mut self`, so populating a registry is single-threaded
//! by construction. Once populated the registry is shared by `&` and selection
//! needs no locking.

use crate::descriptor::{BackendDescriptor, PORTABLE_BACKEND};
use neuronos_common::{BackendError, BackendPreference, CapabilityMask, HalConfig, Result};

/// Ordered collection of backend descriptors.
#[derive(Debug, Default, Clone)]
pub struct BackendRegistry {
    descriptors: Vec<BackendDescriptor>,
}

impl BackendRegistry {
    /// An empty registry. Selection fails until a fallback is registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the portable backend.
    pub fn with_defaults() -> Self {
        Self { descriptors: vec![PORTABLE_BACKEND] }
    }

    /// Append a descriptor.
    ///
    /// Fails with `UnsupportedFeatureCombination` when the descriptor requires
    /// feature bits that have no well-known assignment.
    pub fn register(&mut self, descriptor: BackendDescriptor) -> Result<()> {
        let unknown = descriptor.required_features().unknown_bits();
        if unknown != 0 {
            return Err(BackendError::UnsupportedFeatureCombination {
                backend: descriptor.name().to_string(),
                unknown,
            }
            .into());
        }
        if self.get(descriptor.name()).is_some() {
            log::warn!(
                "backend '{}' registered more than once; the first registration wins ties",
                descriptor.name()
            );
        }
        log::debug!("registered backend {descriptor}");
        self.descriptors.push(descriptor);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Descriptors in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &BackendDescriptor> {
        self.descriptors.iter()
    }

    /// First descriptor registered under `name`.
    pub fn get(&self, name: &str) -> Option<&BackendDescriptor> {
        self.descriptors.iter().find(|d| d.name() == name)
    }

    /// Descriptors whose required features are all in `capabilities`.
    pub fn eligible(&self, capabilities: CapabilityMask) -> impl Iterator<Item = &BackendDescriptor> {
        self.descriptors.iter().filter(move |d| d.is_eligible(capabilities))
    }

    /// A registry must hold at least one descriptor with no requirements.
    pub fn validate(&self) -> Result<()> {
        if !self.descriptors.iter().any(BackendDescriptor::is_fallback) {
            return Err(BackendError::MissingFallback.into());
        }
        Ok(())
    }

    /// Highest-priority eligible descriptor; ties go to the earliest registration.
    pub fn select(&self, capabilities: CapabilityMask) -> Result<&BackendDescriptor> {
        let mut best: Option<&BackendDescriptor> = None;
        for candidate in self.eligible(capabilities) {
            match best {
                Some(current) if current.priority() >= candidate.priority() => {}
                _ => best = Some(candidate),
            }
        }

        match best {
            Some(selected) => {
                log::info!("selected backend {selected} for capabilities {capabilities}");
                Ok(selected)
            }
            None => {
                log::error!(
                    "no eligible backend for capabilities {capabilities} among {} registered",
                    self.len()
                );
                Err(BackendError::NoCompatibleBackend { capabilities, registered: self.len() }
                    .into())
            }
        }
    }

    /// The first eligible descriptor called `name`.
    ///
    /// Names need not be unique; an ineligible registration does not hide a
    /// later eligible one with the same name.
    pub fn select_named(&self, name: &str, capabilities: CapabilityMask) -> Result<&BackendDescriptor> {
        match self.eligible(capabilities).find(|d| d.name() == name) {
            Some(descriptor) => {
                log::info!("using requested backend {descriptor}");
                Ok(descriptor)
            }
            None => Err(BackendError::RequestedUnavailable { requested: name.to_string(), capabilities }
                .into()),
        }
    }

    /// Apply the config's capability override and backend preference.
    pub fn select_with_config(&self, detected: CapabilityMask, config: &HalConfig) -> Result<&BackendDescriptor> {
        let capabilities = config.effective_capabilities(detected)?;
        if capabilities != detected {
            log::warn!("capability mask overridden by config: detected {detected}, using {capabilities}");
        }
        match &config.backend {
            BackendPreference::Auto => self.select(capabilities),
            BackendPreference::Named(name) => self.select_named(name, capabilities),
        }
    }
}
