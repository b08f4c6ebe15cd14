//! Precompiled accelerator configuration images.
//!
//! The processing block runs one of six configuration images, selected by
//! input bit depth and output color family. Production deployments inject
//! the vendor-built images; the default set carries deterministic
//! placeholder images of the right shape so the staging and job plumbing
//! runs unchanged without the firmware drop.

use rzisp_core::prelude::{ColorFamily, InputFormat};

/// The six-image configuration set.
///
/// # Example
/// ```rust
/// use rzisp_core::prelude::{ColorFamily, InputFormat};
/// use rzisp_engine::config::ConfigSet;
///
/// let set = ConfigSet::default();
/// let image = set.select(InputFormat::Raw10, ColorFamily::Yuv);
/// assert!(!image.is_empty());
/// ```
pub struct ConfigSet {
    images: [Vec<u8>; 6],
}

fn slot(input: InputFormat, family: ColorFamily) -> usize {
    let depth = match input {
        InputFormat::Raw8 => 0,
        InputFormat::Raw10 => 1,
        InputFormat::Raw12 => 2,
    };
    let fam = match family {
        ColorFamily::Yuv => 0,
        ColorFamily::Rgb => 1,
    };
    fam * 3 + depth
}

fn placeholder(index: usize) -> Vec<u8> {
    // Distinct size and content per slot so staging mistakes (wrong image,
    // wrong length) show up in tests.
    let size = 0x2_0000 + index * 0x1000;
    let mut image = vec![0u8; size];
    image[0..4].copy_from_slice(b"DRPC");
    image[4] = index as u8;
    for (i, byte) in image.iter_mut().enumerate().skip(8) {
        *byte = (i as u8).wrapping_mul(0x9D).wrapping_add(index as u8);
    }
    image
}

impl Default for ConfigSet {
    fn default() -> Self {
        ConfigSet {
            images: [
                placeholder(0),
                placeholder(1),
                placeholder(2),
                placeholder(3),
                placeholder(4),
                placeholder(5),
            ],
        }
    }
}

impl ConfigSet {
    /// Build a set from externally supplied images, ordered
    /// [YUV raw8/10/12, RGB raw8/10/12].
    pub fn from_images(images: [Vec<u8>; 6]) -> ConfigSet {
        ConfigSet { images }
    }

    /// The image for an input depth and output family.
    pub fn select(&self, input: InputFormat, family: ColorFamily) -> &[u8] {
        &self.images[slot(input, family)]
    }
}
