use super::{Capability, CapabilityError, CapabilityInput, CapabilityOutput};
use crate::resource::ModuleKind;

/// Built-in `raw` capability: copies bytes unchanged with no dependencies.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCapability;

impl Capability for RawCapability {
    fn name(&self) -> &str {
        "raw"
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Asset
    }

    fn compile(&self, input: &CapabilityInput<'_>) -> Result<CapabilityOutput, CapabilityError> {
        Ok(CapabilityOutput {
            code: input.source.to_vec(),
            dependencies: Vec::new(),
        })
    }
}
