// THEORY:
// The `overlay` module produces the images a human uses to audit a detection run.
// It never modifies its inputs: every overlay starts as a copy of the sample's
// original greyscale image.
//
// 1.  **Edge Map**: the boundary of the foreground (`label > 0`) is computed once
//     per frame, either as the morphological inner boundary or with a Canny pass
//     over the mask, and painted in the ink value.
// 2.  **Labels**: each region's display id is stamped at its centroid with a small
//     bitmap font. In the "all labels" mode every id uses the colour that
//     contrasts with the ink. In the "selected" mode only the chosen region gets
//     the contrasting colour; every other id is drawn in the ink itself and
//     disappears into the edges, so exactly one id is legible.

use crate::core_modules::glyphs;
use crate::core_modules::region::{Centroid, LabelGrid};
use crate::error::{SpotResult, ValidationError};
use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// The two ink values overlays are drawn with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ink {
    #[default]
    Black,
    White,
}

impl Ink {
    pub fn value(self) -> u8 {
        match self {
            Ink::Black => 0,
            Ink::White => 255,
        }
    }

    /// The ink that reads against this one.
    pub fn contrast(self) -> Ink {
        match self {
            Ink::Black => Ink::White,
            Ink::White => Ink::Black,
        }
    }

    pub fn toggled(self) -> Ink {
        self.contrast()
    }
}

/// How region boundaries are found.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum EdgeMode {
    /// Foreground pixels with a 4-neighbour that is background or off-image.
    #[default]
    Boundary,
    /// Canny over the binary mask.
    Canny { low: f32, high: f32 },
}

/// Drawing parameters shared by both overlay modes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayStyle {
    pub edge_mode: EdgeMode,
    pub font_scale: u32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            edge_mode: EdgeMode::Boundary,
            font_scale: 1,
        }
    }
}

/// Edge pixels of the labeled foreground, 255 on edges and 0 elsewhere.
pub fn edge_map(labeled: &LabelGrid, mode: EdgeMode) -> GrayImage {
    let (width, height) = labeled.dimensions();
    let is_fg = |x: i64, y: i64| {
        x >= 0
            && y >= 0
            && x < width as i64
            && y < height as i64
            && labeled.get_pixel(x as u32, y as u32)[0] > 0
    };

    match mode {
        EdgeMode::Boundary => GrayImage::from_fn(width, height, |x, y| {
            let (xi, yi) = (x as i64, y as i64);
            let on_edge = is_fg(xi, yi)
                && [(0i64, -1i64), (0, 1), (-1, 0), (1, 0)]
                    .iter()
                    .any(|(dx, dy)| !is_fg(xi + dx, yi + dy));
            Luma([if on_edge { 255 } else { 0 }])
        }),
        EdgeMode::Canny { low, high } => {
            let mask = GrayImage::from_fn(width, height, |x, y| {
                Luma([if labeled.get_pixel(x, y)[0] > 0 { 255 } else { 0 }])
            });
            imageproc::edges::canny(&mask, low, high)
        }
    }
}

fn check_frame(original: &GrayImage, labeled: &LabelGrid) -> Result<(), ValidationError> {
    if original.dimensions() != labeled.dimensions() {
        let (ow, oh) = original.dimensions();
        let (lw, lh) = labeled.dimensions();
        error!(ow, oh, lw, lh, "original and labeled grids differ in size");
        return Err(ValidationError::ShapeMismatch {
            expected: ow as usize * oh as usize,
            actual: lw as usize * lh as usize,
        });
    }
    Ok(())
}

fn check_lengths(expected: usize, actual: usize) -> Result<(), ValidationError> {
    if expected != actual {
        error!(expected, actual, "overlay inputs are not parallel");
        return Err(ValidationError::ShapeMismatch { expected, actual });
    }
    Ok(())
}

fn paint_edges(overlay: &mut GrayImage, edges: &GrayImage, ink: Ink) {
    for (dst, edge) in overlay.pixels_mut().zip(edges.pixels()) {
        if edge[0] > 0 {
            *dst = Luma([ink.value()]);
        }
    }
}

fn stamp(overlay: &mut GrayImage, name: &str, centroid: &Centroid, value: u8, scale: u32) {
    glyphs::draw_text(
        overlay,
        name,
        centroid.col as i64,
        centroid.row as i64,
        value,
        scale,
    );
}

/// Draws edges in `ink` and every label in the contrasting colour, per frame.
pub fn overlay_all(
    originals: &[GrayImage],
    labeled_grids: &[LabelGrid],
    names: &[Vec<String>],
    centroids: &[Vec<Centroid>],
    ink: Ink,
    style: &OverlayStyle,
) -> SpotResult<Vec<GrayImage>> {
    check_lengths(originals.len(), labeled_grids.len())?;
    check_lengths(originals.len(), names.len())?;
    check_lengths(originals.len(), centroids.len())?;

    let text = ink.contrast().value();
    let mut overlays = Vec::with_capacity(originals.len());
    for (((original, labeled), frame_names), frame_centroids) in originals
        .iter()
        .zip(labeled_grids)
        .zip(names)
        .zip(centroids)
    {
        check_frame(original, labeled)?;
        check_lengths(frame_names.len(), frame_centroids.len())?;

        let mut overlay = original.clone();
        paint_edges(&mut overlay, &edge_map(labeled, style.edge_mode), ink);
        for (name, centroid) in frame_names.iter().zip(frame_centroids) {
            stamp(&mut overlay, name, centroid, text, style.font_scale);
        }
        overlays.push(overlay);
    }

    debug!(frames = overlays.len(), ?ink, "overlays rendered");
    Ok(overlays)
}

/// Draws edges and labels in `base`, except the selected label which gets the
/// contrasting colour. Every edge pixel ends up in `base`, also where a label
/// overlaps the boundary of a small region.
pub fn overlay_selected(
    original: &GrayImage,
    labeled: &LabelGrid,
    names: &[String],
    centroids: &[Centroid],
    selected_index: usize,
    base: Ink,
    style: &OverlayStyle,
) -> SpotResult<GrayImage> {
    check_frame(original, labeled)?;
    check_lengths(names.len(), centroids.len())?;
    if selected_index >= names.len() {
        error!(selected_index, regions = names.len(), "selected region out of range");
        return Err(ValidationError::RegionOutOfRange {
            index: selected_index,
            count: names.len(),
        }
        .into());
    }

    let mut overlay = original.clone();
    let selected = &names[selected_index];
    for (name, centroid) in names.iter().zip(centroids) {
        let ink = if name == selected { base.contrast() } else { base };
        stamp(&mut overlay, name, centroid, ink.value(), style.font_scale);
    }

    // Edges go on last so no label pixel can cover them.
    paint_edges(&mut overlay, &edge_map(labeled, style.edge_mode), base);
    Ok(overlay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::feature_extractor::feature_extractor::{calculate_regions, label};

    struct Scene {
        original: GrayImage,
        labeled: LabelGrid,
        names: Vec<String>,
        centroids: Vec<Centroid>,
    }

    /// Three 24x24 squares on a mid-grey background.
    fn scene() -> Scene {
        let mut mask = GrayImage::new(100, 40);
        for &(x0, y0) in &[(4u32, 4u32), (38, 4), (72, 8)] {
            for y in y0..y0 + 24 {
                for x in x0..x0 + 24 {
                    mask.put_pixel(x, y, Luma([255]));
                }
            }
        }
        let labeling = label(&mask).expect("labeling");
        let regions = calculate_regions(&labeling.grid).expect("regions");
        Scene {
            original: GrayImage::from_pixel(100, 40, Luma([128])),
            labeled: labeling.grid,
            names: labeling.region_ids,
            centroids: regions.iter().map(|r| r.centroid).collect(),
        }
    }

    #[test]
    fn boundary_of_a_square_is_its_outline() {
        let s = scene();
        let edges = edge_map(&s.labeled, EdgeMode::Boundary);
        assert_eq!(edges.get_pixel(4, 4)[0], 255);
        assert_eq!(edges.get_pixel(27, 10)[0], 255);
        assert_eq!(edges.get_pixel(10, 10)[0], 0);
        assert_eq!(edges.get_pixel(0, 0)[0], 0);
        let count = edges.pixels().filter(|p| p[0] > 0).count();
        assert_eq!(count, 3 * (4 * 24 - 4));
    }

    #[test]
    fn overlay_all_paints_edges_and_contrasting_text() {
        let s = scene();
        let style = OverlayStyle::default();
        let originals = vec![s.original.clone()];
        let out = overlay_all(
            &originals,
            &[s.labeled.clone()],
            &[s.names.clone()],
            &[s.centroids.clone()],
            Ink::Black,
            &style,
        )
        .expect("overlay");
        assert_eq!(out.len(), 1);
        let img = &out[0];

        // Edges in black, labels in white, the rest untouched.
        assert_eq!(img.get_pixel(4, 4)[0], 0);
        assert!(img.pixels().any(|p| p[0] == 255));
        assert!(img.pixels().all(|p| matches!(p[0], 0 | 128 | 255)));
        // The input is not modified.
        assert!(originals[0].pixels().all(|p| p[0] == 128));
    }

    #[test]
    fn white_variant_swaps_ink_and_text() {
        let s = scene();
        let out = overlay_all(
            &[s.original.clone()],
            &[s.labeled.clone()],
            &[s.names.clone()],
            &[s.centroids.clone()],
            Ink::White,
            &OverlayStyle::default(),
        )
        .expect("overlay");
        assert_eq!(out[0].get_pixel(4, 4)[0], 255);
        assert!(out[0].pixels().any(|p| p[0] == 0));
    }

    #[test]
    fn selected_overlay_has_exactly_one_legible_label() {
        let s = scene();
        let style = OverlayStyle::default();
        let edges = edge_map(&s.labeled, style.edge_mode);

        for base in [Ink::White, Ink::Black] {
            for selected in 0..s.names.len() {
                let img = overlay_selected(
                    &s.original,
                    &s.labeled,
                    &s.names,
                    &s.centroids,
                    selected,
                    base,
                    &style,
                )
                .expect("overlay");

                let contrast = base.contrast().value();
                // Every contrast-coloured pixel sits in the selected label's text box.
                let c = s.centroids[selected];
                let (left, bottom) = (c.col as u32, c.row as u32);
                let width = glyphs::text_width(&s.names[selected], 1);
                for (x, y, p) in img.enumerate_pixels() {
                    if p[0] == contrast {
                        assert!(x >= left && x < left + width, "x={x}");
                        assert!(y + glyphs::GLYPH_HEIGHT > bottom && y <= bottom, "y={y}");
                    }
                }
                assert!(img.pixels().any(|p| p[0] == contrast));

                // Every edge pixel is in the base colour.
                for (x, y, e) in edges.enumerate_pixels() {
                    if e[0] > 0 {
                        assert_eq!(img.get_pixel(x, y)[0], base.value());
                    }
                }
            }
        }
    }

    #[test]
    fn selected_index_out_of_range_is_rejected() {
        let s = scene();
        let err = overlay_selected(
            &s.original,
            &s.labeled,
            &s.names,
            &s.centroids,
            3,
            Ink::White,
            &OverlayStyle::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn small_spots_keep_their_edges_in_the_base_colour() {
        // Two 4x4 spots: every label overlaps a boundary.
        let mut mask = GrayImage::new(16, 10);
        for &x0 in &[2u32, 8] {
            for y in 3..7 {
                for x in x0..x0 + 4 {
                    mask.put_pixel(x, y, Luma([255]));
                }
            }
        }
        let labeling = label(&mask).expect("labeling");
        let regions = calculate_regions(&labeling.grid).expect("regions");
        let centroids: Vec<Centroid> = regions.iter().map(|r| r.centroid).collect();
        let original = GrayImage::from_pixel(16, 10, Luma([128]));
        let style = OverlayStyle::default();
        let edges = edge_map(&labeling.grid, style.edge_mode);

        for base in [Ink::White, Ink::Black] {
            for selected in 0..2 {
                let img = overlay_selected(
                    &original,
                    &labeling.grid,
                    &labeling.region_ids,
                    &centroids,
                    selected,
                    base,
                    &style,
                )
                .expect("overlay");
                let wrong: Vec<(u32, u32)> = edges
                    .enumerate_pixels()
                    .filter(|(x, y, e)| e[0] > 0 && img.get_pixel(*x, *y)[0] != base.value())
                    .map(|(x, y, _)| (x, y))
                    .collect();
                assert!(wrong.is_empty(), "edge pixels off the base colour: {wrong:?}");
            }
        }
    }

    #[test]
    fn mismatched_frame_size_is_rejected() {
        let s = scene();
        let small = GrayImage::new(10, 10);
        let err = overlay_selected(&small, &s.labeled, &s.names, &s.centroids, 0, Ink::White, &OverlayStyle::default())
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::SpotError::Validation(ValidationError::ShapeMismatch {
                expected: 100,
                actual: 4000
            })
        ));
    }

    #[test]
    fn canny_mode_finds_edges_near_the_boundary() {
        let s = scene();
        let edges = edge_map(&s.labeled, EdgeMode::Canny { low: 50.0, high: 100.0 });
        assert!(edges.pixels().any(|p| p[0] > 0));
        // Deep inside a square there is no gradient.
        assert_eq!(edges.get_pixel(16, 16)[0], 0);
    }
}
