//! Name-to-program lookup for externally compiled shader programs.

use ahash::{HashMap, HashMapExt};

use crate::driver::ProgramHandle;

/// Suffix distinguishing the uniform-buffer variants of the scene shaders
/// from their immediate-mode counterparts.
pub const UNIFORM_VARIANT_SUFFIX: &str = "_uniform";

/// Shader name the textured-material binding path keys on.
pub const TEXTURED_SHADER_NAME: &str = "simple_textured_object_uniform";

/// Registry of linked shader programs, filled by the embedder at startup.
///
/// Lookups never fail: unknown names resolve to [`ProgramHandle::NULL`],
/// and downstream code treats a null program as "no program" rather than
/// an error.
#[derive(Debug, Default)]
pub struct ShaderRegistry {
    programs: HashMap<String, ProgramHandle>,
}

impl ShaderRegistry {
    pub fn new() -> Self {
        Self {
            programs: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, program: ProgramHandle) {
        self.programs.insert(name.into(), program);
    }

    pub fn lookup(&self, name: &str) -> ProgramHandle {
        self.programs.get(name).copied().unwrap_or(ProgramHandle::NULL)
    }

    /// Resolves the uniform-buffer variant of a scene shader name.
    pub fn lookup_uniform_variant(&self, base_name: &str) -> ProgramHandle {
        let mut name = String::with_capacity(base_name.len() + UNIFORM_VARIANT_SUFFIX.len());
        name.push_str(base_name);
        name.push_str(UNIFORM_VARIANT_SUFFIX);
        self.lookup(&name)
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_names_resolve_to_null() {
        let registry = ShaderRegistry::new();
        assert!(registry.lookup("does_not_exist").is_null());
    }

    #[test]
    fn uniform_variant_lookup_appends_suffix() {
        let mut registry = ShaderRegistry::new();
        registry.register("unlit_colored_uniform", ProgramHandle(7));

        assert_eq!(
            registry.lookup_uniform_variant("unlit_colored"),
            ProgramHandle(7)
        );
        assert!(registry.lookup_uniform_variant("unlit_colored_uniform").is_null());
    }
}
