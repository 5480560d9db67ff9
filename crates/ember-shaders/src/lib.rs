//! Shaders for the Ember engine.
//!
//! GLSL sources are compiled to SPIR-V at build time using shaderc.

use std::sync::OnceLock;

/// Embedded SPIR-V bytecode (raw bytes, may not be aligned).
mod spirv_bytes {
    pub static SPRITE_VERT: &[u8] =
        include_bytes!(concat!(env!("OUT_DIR"), "/sprite_vert.spv"));
    pub static SPRITE_FRAG: &[u8] =
        include_bytes!(concat!(env!("OUT_DIR"), "/sprite_frag.spv"));
}

/// Convert byte slice to aligned u32 Vec (SPIR-V requires 4-byte alignment).
fn bytes_to_spirv(bytes: &[u8]) -> Vec<u32> {
    assert!(
        bytes.len() % 4 == 0,
        "SPIR-V bytecode must be 4-byte aligned"
    );
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

static SPRITE_VERT_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();
static SPRITE_FRAG_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();

/// Sprite vertex shader as a u32 slice for Vulkan.
pub fn sprite_vertex_shader() -> &'static [u32] {
    SPRITE_VERT_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::SPRITE_VERT))
}

/// Sprite fragment shader as a u32 slice for Vulkan.
pub fn sprite_fragment_shader() -> &'static [u32] {
    SPRITE_FRAG_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::SPRITE_FRAG))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sprite_shaders_load() {
        assert_eq!(sprite_vertex_shader()[0], 0x0723_0203, "Invalid SPIR-V magic");
        assert_eq!(sprite_fragment_shader()[0], 0x0723_0203, "Invalid SPIR-V magic");
    }
}
