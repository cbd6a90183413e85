//! Agnostic mask synthesis from dense part segmentation and human parsing
//! label maps.
//!
//! All masks here are `GrayImage`s holding 0 or 255.

use image::{imageops, imageops::FilterType, GrayImage, Luma};
use imageproc::contours::find_contours;
use imageproc::distance_transform::Norm;
use imageproc::drawing::draw_polygon_mut;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometry::convex_hull;
use imageproc::map::{map_colors, map_colors2};
use imageproc::morphology::dilate;
use imageproc::point::Point;

use crate::config::ClothType;
use crate::errors::{AgnosticMaskError, Result};

const ON: Luma<u8> = Luma([255]);
const OFF: Luma<u8> = Luma([0]);

/// Blurred masks below this value are dropped.
const BLUR_THRESHOLD: u8 = 25;

/// DensePose coarse part indices.
pub mod dense {
    pub const TORSO: &[u8] = &[1, 2];
    pub const HANDS: &[u8] = &[3, 4];
    pub const FEET: &[u8] = &[5, 6];
    pub const THIGHS: &[u8] = &[7, 8, 9, 10];
    pub const LEGS: &[u8] = &[11, 12, 13, 14];
    pub const BIG_ARMS: &[u8] = &[15, 16, 17, 18];
    pub const FOREARMS: &[u8] = &[19, 20, 21, 22];
    pub const FACE: &[u8] = &[23, 24];
}

/// ATR parsing labels (18 classes).
pub mod atr {
    pub const BACKGROUND: u8 = 0;
    pub const HAT: u8 = 1;
    pub const HAIR: u8 = 2;
    pub const SUNGLASSES: u8 = 3;
    pub const UPPER_CLOTHES: u8 = 4;
    pub const SKIRT: u8 = 5;
    pub const PANTS: u8 = 6;
    pub const DRESS: u8 = 7;
    pub const BELT: u8 = 8;
    pub const LEFT_SHOE: u8 = 9;
    pub const RIGHT_SHOE: u8 = 10;
    pub const FACE: u8 = 11;
    pub const LEFT_LEG: u8 = 12;
    pub const RIGHT_LEG: u8 = 13;
    pub const LEFT_ARM: u8 = 14;
    pub const RIGHT_ARM: u8 = 15;
    pub const BAG: u8 = 16;
    pub const SCARF: u8 = 17;
}

/// LIP parsing labels (20 classes).
pub mod lip {
    pub const BACKGROUND: u8 = 0;
    pub const HAT: u8 = 1;
    pub const HAIR: u8 = 2;
    pub const GLOVE: u8 = 3;
    pub const SUNGLASSES: u8 = 4;
    pub const UPPER_CLOTHES: u8 = 5;
    pub const DRESS: u8 = 6;
    pub const COAT: u8 = 7;
    pub const SOCKS: u8 = 8;
    pub const PANTS: u8 = 9;
    pub const JUMPSUITS: u8 = 10;
    pub const SCARF: u8 = 11;
    pub const SKIRT: u8 = 12;
    pub const FACE: u8 = 13;
    pub const LEFT_ARM: u8 = 14;
    pub const RIGHT_ARM: u8 = 15;
    pub const LEFT_LEG: u8 = 16;
    pub const RIGHT_LEG: u8 = 17;
    pub const LEFT_SHOE: u8 = 18;
    pub const RIGHT_SHOE: u8 = 19;
}

/// Class selection for one cloth type, per label set.
struct Parts {
    atr: &'static [u8],
    lip: &'static [u8],
}

const LIMBS: Parts = Parts {
    atr: &[atr::LEFT_ARM, atr::RIGHT_ARM, atr::LEFT_LEG, atr::RIGHT_LEG],
    lip: &[lip::LEFT_ARM, lip::RIGHT_ARM, lip::LEFT_LEG, lip::RIGHT_LEG],
};

const HAIR: Parts = Parts {
    atr: &[atr::HAIR],
    lip: &[lip::HAIR],
};

const ACCESSORIES: Parts = Parts {
    atr: &[
        atr::HAT,
        atr::SUNGLASSES,
        atr::BAG,
        atr::LEFT_SHOE,
        atr::RIGHT_SHOE,
        atr::SCARF,
    ],
    lip: &[
        lip::HAT,
        lip::GLOVE,
        lip::SUNGLASSES,
        lip::LEFT_SHOE,
        lip::RIGHT_SHOE,
        lip::SCARF,
        lip::SOCKS,
    ],
};

fn protected_body_parts(cloth_type: ClothType) -> Parts {
    match cloth_type {
        ClothType::Upper | ClothType::Inner | ClothType::Outer => Parts {
            atr: &[atr::LEFT_LEG, atr::RIGHT_LEG],
            lip: &[lip::LEFT_LEG, lip::RIGHT_LEG],
        },
        ClothType::Lower => Parts {
            atr: &[atr::RIGHT_ARM, atr::LEFT_ARM, atr::FACE],
            lip: &[lip::RIGHT_ARM, lip::LEFT_ARM, lip::FACE],
        },
        ClothType::Overall => Parts { atr: &[], lip: &[] },
    }
}

fn protected_cloth_parts(cloth_type: ClothType) -> Parts {
    match cloth_type {
        ClothType::Upper => Parts {
            atr: &[atr::SKIRT, atr::PANTS],
            lip: &[lip::SKIRT, lip::PANTS],
        },
        ClothType::Lower => Parts {
            atr: &[atr::UPPER_CLOTHES],
            lip: &[lip::UPPER_CLOTHES, lip::COAT],
        },
        ClothType::Overall => Parts { atr: &[], lip: &[] },
        ClothType::Inner => Parts {
            atr: &[atr::DRESS, atr::SKIRT, atr::PANTS],
            lip: &[lip::DRESS, lip::COAT, lip::SKIRT, lip::PANTS, lip::JUMPSUITS],
        },
        ClothType::Outer => Parts {
            atr: &[atr::DRESS, atr::PANTS, atr::SKIRT],
            lip: &[lip::UPPER_CLOTHES, lip::DRESS, lip::PANTS, lip::SKIRT, lip::JUMPSUITS],
        },
    }
}

fn masked_cloth_parts(cloth_type: ClothType) -> Parts {
    match cloth_type {
        ClothType::Upper => Parts {
            atr: &[atr::UPPER_CLOTHES, atr::DRESS],
            lip: &[lip::UPPER_CLOTHES, lip::COAT, lip::DRESS, lip::JUMPSUITS],
        },
        ClothType::Lower => Parts {
            atr: &[atr::PANTS, atr::SKIRT, atr::DRESS],
            lip: &[lip::PANTS, lip::SKIRT, lip::DRESS, lip::JUMPSUITS],
        },
        ClothType::Overall => Parts {
            atr: &[atr::UPPER_CLOTHES, atr::DRESS, atr::PANTS, atr::SKIRT],
            lip: &[
                lip::UPPER_CLOTHES,
                lip::DRESS,
                lip::PANTS,
                lip::SKIRT,
                lip::COAT,
                lip::JUMPSUITS,
            ],
        },
        ClothType::Inner => Parts {
            atr: &[atr::UPPER_CLOTHES],
            lip: &[lip::UPPER_CLOTHES],
        },
        ClothType::Outer => Parts {
            atr: &[],
            lip: &[lip::COAT],
        },
    }
}

fn masked_dense_parts(cloth_type: ClothType) -> Vec<u8> {
    let groups: &[&[u8]] = match cloth_type {
        ClothType::Upper | ClothType::Outer => &[dense::TORSO, dense::BIG_ARMS, dense::FOREARMS],
        ClothType::Lower => &[dense::THIGHS, dense::LEGS],
        ClothType::Overall => &[
            dense::TORSO,
            dense::THIGHS,
            dense::LEGS,
            dense::BIG_ARMS,
            dense::FOREARMS,
        ],
        ClothType::Inner => &[dense::TORSO],
    };
    groups.concat()
}

/// Per-pixel class indices from the three models, all at image resolution.
#[derive(Debug, Clone)]
pub struct ParsingMaps {
    pub densepose: GrayImage,
    pub atr: GrayImage,
    pub lip: GrayImage,
}

impl ParsingMaps {
    fn parsed(&self, parts: &Parts) -> GrayImage {
        union(&part_mask(&self.atr, parts.atr), &part_mask(&self.lip, parts.lip))
    }
}

/// Builds the agnostic mask for `cloth_type`.
pub fn agnostic_mask(maps: &ParsingMaps, cloth_type: ClothType) -> Result<GrayImage> {
    let (width, height) = maps.densepose.dimensions();
    for (name, map) in [("atr", &maps.atr), ("lip", &maps.lip)] {
        if map.dimensions() != (width, height) {
            return Err(AgnosticMaskError::Validation {
                field: format!("{name} label map"),
                reason: format!(
                    "is {}x{}, expected {width}x{height}",
                    map.width(),
                    map.height()
                ),
            });
        }
    }

    let extent = width.max(height);
    let dilate_size = odd_kernel(extent, 250);
    let blur_size = odd_kernel(extent, 25);

    // Hands and feet are only protected where parsing agrees they are skin.
    let extremities = dilate_square(
        &part_mask(&maps.densepose, &[dense::HANDS, dense::FEET].concat()),
        dilate_size,
    );
    let hands = intersect(&extremities, &maps.parsed(&LIMBS));
    let face = part_mask(&maps.lip, &[lip::FACE]);
    let strong_protect = union(&hands, &face);

    let weak_protect = [
        maps.parsed(&protected_body_parts(cloth_type)),
        maps.parsed(&protected_cloth_parts(cloth_type)),
        maps.parsed(&HAIR),
        maps.parsed(&ACCESSORIES),
    ]
    .iter()
    .fold(strong_protect.clone(), |acc, m| union(&acc, m));

    let strong_mask = maps.parsed(&masked_cloth_parts(cloth_type));
    let background = intersect(
        &part_mask(&maps.atr, &[atr::BACKGROUND]),
        &part_mask(&maps.lip, &[lip::BACKGROUND]),
    );
    let dense_area = dilate_coarse(
        &part_mask(&maps.densepose, &masked_dense_parts(cloth_type)),
        dilate_size,
    );

    let foreground = intersect(&invert(&weak_protect), &invert(&background));
    let mask = union(&foreground, &dense_area);
    let mask = fill_convex_hulls(&mask);
    let mask = intersect(&mask, &invert(&weak_protect));
    let mask = threshold(&gaussian_blur_f32(&mask, blur_sigma(blur_size)), BLUR_THRESHOLD);
    let mask = intersect(&union(&mask, &strong_mask), &invert(&strong_protect));

    Ok(dilate_square(&mask, dilate_size))
}

/// `extent / divisor`, bumped to the next odd number.
pub fn odd_kernel(extent: u32, divisor: u32) -> u32 {
    let size = extent / divisor;
    if size % 2 == 1 {
        size
    } else {
        size + 1
    }
}

/// Sigma OpenCV derives for a gaussian kernel of `size` when none is given.
fn blur_sigma(size: u32) -> f32 {
    0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

pub fn part_mask(labels: &GrayImage, classes: &[u8]) -> GrayImage {
    map_colors(labels, |Luma([label])| {
        if classes.contains(&label) {
            ON
        } else {
            OFF
        }
    })
}

fn union(a: &GrayImage, b: &GrayImage) -> GrayImage {
    map_colors2(a, b, |Luma([x]), Luma([y])| Luma([x.max(y)]))
}

fn intersect(a: &GrayImage, b: &GrayImage) -> GrayImage {
    map_colors2(a, b, |Luma([x]), Luma([y])| Luma([x.min(y)]))
}

fn invert(mask: &GrayImage) -> GrayImage {
    map_colors(mask, |Luma([v])| Luma([255 - v]))
}

fn threshold(mask: &GrayImage, level: u8) -> GrayImage {
    map_colors(mask, |Luma([v])| if v >= level { ON } else { OFF })
}

fn dilate_square(mask: &GrayImage, size: u32) -> GrayImage {
    let radius = (size / 2).min(u8::MAX as u32) as u8;
    if radius == 0 {
        return mask.clone();
    }
    dilate(mask, Norm::LInf, radius)
}

/// Dilates twice at quarter resolution, which grows the region far more
/// cheaply than dilating at full size.
fn dilate_coarse(mask: &GrayImage, size: u32) -> GrayImage {
    let (width, height) = mask.dimensions();
    let small = imageops::resize(
        mask,
        (width / 4).max(1),
        (height / 4).max(1),
        FilterType::Nearest,
    );
    let small = dilate_square(&dilate_square(&small, size), size);
    imageops::resize(&small, width, height, FilterType::Nearest)
}

/// Replaces every outer contour with its filled convex hull.
fn fill_convex_hulls(mask: &GrayImage) -> GrayImage {
    let mut filled = mask.clone();
    for contour in find_contours::<i32>(mask) {
        if contour.parent.is_some() {
            continue;
        }
        let hull = convex_hull(contour.points.as_slice());
        if hull.len() >= 3 {
            draw_polygon_mut(&mut filled, &hull, ON);
        } else {
            for Point { x, y } in hull {
                filled.put_pixel(x as u32, y as u32, ON);
            }
        }
    }
    filled
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: u32 = 100;

    fn blank() -> GrayImage {
        GrayImage::new(SIZE, SIZE)
    }

    fn fill(map: &mut GrayImage, x0: u32, y0: u32, x1: u32, y1: u32, label: u8) {
        for y in y0..y1 {
            for x in x0..x1 {
                map.put_pixel(x, y, Luma([label]));
            }
        }
    }

    /// A torso block in the middle, parsed as upper clothes by both parsers.
    fn torso_figure() -> ParsingMaps {
        let mut densepose = blank();
        let mut atr_map = blank();
        let mut lip_map = blank();
        fill(&mut densepose, 30, 20, 70, 80, dense::TORSO[0]);
        fill(&mut atr_map, 30, 20, 70, 80, atr::UPPER_CLOTHES);
        fill(&mut lip_map, 30, 20, 70, 80, lip::UPPER_CLOTHES);
        ParsingMaps {
            densepose,
            atr: atr_map,
            lip: lip_map,
        }
    }

    #[test]
    fn test_odd_kernel() {
        assert_eq!(odd_kernel(100, 250), 1);
        assert_eq!(odd_kernel(1000, 250), 5);
        assert_eq!(odd_kernel(768, 250), 3);
        assert_eq!(odd_kernel(1024, 25), 41);
        assert_eq!(odd_kernel(100, 25), 5);
    }

    #[test]
    fn test_part_mask() {
        let mut labels = blank();
        labels.put_pixel(1, 1, Luma([lip::FACE]));
        labels.put_pixel(2, 2, Luma([lip::HAIR]));

        let mask = part_mask(&labels, &[lip::FACE]);
        assert_eq!(mask.get_pixel(1, 1), &ON);
        assert_eq!(mask.get_pixel(2, 2), &OFF);
        assert_eq!(mask.get_pixel(0, 0), &OFF);
    }

    #[test]
    fn test_upper_mask_covers_torso_only() -> Result<()> {
        let mask = agnostic_mask(&torso_figure(), ClothType::Upper)?;

        assert_eq!(mask.dimensions(), (SIZE, SIZE));
        assert_eq!(mask.get_pixel(50, 50), &ON);
        assert_eq!(mask.get_pixel(5, 5), &OFF);
        assert_eq!(mask.get_pixel(95, 95), &OFF);
        assert!(mask.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
        Ok(())
    }

    #[test]
    fn test_face_is_never_masked() -> Result<()> {
        let mut maps = torso_figure();
        fill(&mut maps.lip, 40, 30, 60, 46, lip::FACE);
        fill(&mut maps.atr, 40, 30, 60, 46, atr::FACE);

        let mask = agnostic_mask(&maps, ClothType::Upper)?;
        assert_eq!(mask.get_pixel(50, 38), &OFF);
        assert_eq!(mask.get_pixel(50, 65), &ON);
        Ok(())
    }

    #[test]
    fn test_lower_mask_leaves_upper_clothes() -> Result<()> {
        let mask = agnostic_mask(&torso_figure(), ClothType::Lower)?;
        assert_eq!(mask.get_pixel(50, 50), &OFF);
        Ok(())
    }

    #[test]
    fn test_dense_parts_survive_parsing_background() -> Result<()> {
        let mut densepose = blank();
        fill(&mut densepose, 30, 20, 70, 80, dense::TORSO[1]);
        let maps = ParsingMaps {
            densepose,
            atr: blank(),
            lip: blank(),
        };

        let mask = agnostic_mask(&maps, ClothType::Upper)?;
        assert_eq!(mask.get_pixel(50, 50), &ON);
        assert_eq!(mask.get_pixel(5, 5), &OFF);
        Ok(())
    }

    #[test]
    fn test_mismatched_maps_are_rejected() {
        let maps = ParsingMaps {
            densepose: blank(),
            atr: GrayImage::new(10, 10),
            lip: blank(),
        };
        assert!(agnostic_mask(&maps, ClothType::Upper).is_err());
    }

    #[test]
    fn test_dilate_coarse_is_a_quarter_resolution_round_trip() {
        let mut mask = blank();
        fill(&mut mask, 41, 41, 59, 59, 255);

        let small = imageops::resize(&mask, SIZE / 4, SIZE / 4, FilterType::Nearest);
        let expected = imageops::resize(&small, SIZE, SIZE, FilterType::Nearest);
        assert_eq!(dilate_coarse(&mask, 1), expected);

        let grown = dilate_coarse(&mask, 5);
        assert_eq!(grown.get_pixel(50, 50), &ON);
        assert_eq!(grown.get_pixel(35, 50), &ON);
        assert_eq!(grown.get_pixel(5, 5), &OFF);
    }

    #[test]
    fn test_convex_hull_fills_concavity() {
        // U shape: two bars joined at the bottom.
        let mut mask = blank();
        fill(&mut mask, 20, 20, 30, 80, 255);
        fill(&mut mask, 70, 20, 80, 80, 255);
        fill(&mut mask, 20, 70, 80, 80, 255);

        let filled = fill_convex_hulls(&mask);
        assert_eq!(filled.get_pixel(50, 40), &ON);
        assert_eq!(filled.get_pixel(5, 5), &OFF);
    }
}
