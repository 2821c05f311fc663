//! HEX file info command implementation.

use {
    anyhow::{Context, Result},
    console::style,
    megaload::MemoryImage,
    std::path::Path,
};

/// Summary of an image as a JSON value.
fn image_summary(hex: &Path, image: &MemoryImage, page_size: u32) -> serde_json::Value {
    let segments: Vec<serde_json::Value> = image
        .segments()
        .iter()
        .map(|s| {
            serde_json::json!({
                "start": s.start,
                "end": s.end(),
                "length": s.data.len(),
            })
        })
        .collect();

    serde_json::json!({
        "file": hex.display().to_string(),
        "bytes": image.len(),
        "min_address": image.min_address(),
        "max_address": image.max_address(),
        "page_size": page_size,
        "pages": image.page_starts(page_size).len(),
        "segments": segments,
    })
}

/// Info command implementation.
pub(crate) fn cmd_info(hex: &Path, page_size: u32, json: bool) -> Result<()> {
    let image =
        MemoryImage::from_file(hex).with_context(|| format!("Failed to load {}", hex.display()))?;

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": image_summary(hex, &image, page_size),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output)?
        );
        return Ok(());
    }

    println!(
        "{}",
        style(format!("Intel HEX: {}", hex.display()))
            .bold()
            .underlined()
    );
    println!();

    let (Some(min), Some(max)) = (image.min_address(), image.max_address()) else {
        println!("  {}", style("(empty image)").dim());
        return Ok(());
    };

    println!("  Bytes:      {}", image.len());
    println!("  Range:      0x{min:05X}..=0x{max:05X}");
    println!(
        "  Pages:      {} of {page_size} bytes",
        image
            .page_starts(page_size)
            .len()
    );
    println!();
    println!(
        "  {:<4} {:<10} {:<10} {:<8}",
        style("#").bold(),
        style("Start").bold(),
        style("End").bold(),
        style("Length").bold()
    );
    for (i, segment) in image
        .segments()
        .iter()
        .enumerate()
    {
        println!(
            "  {:<4} 0x{:05X}    0x{:05X}    {}",
            i,
            segment.start,
            segment.end(),
            segment
                .data
                .len()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_summary() {
        let hex = ":0400000001020304F2\n:02001000AABB89\n:00000001FF\n";
        let image = MemoryImage::from_ihex(hex).unwrap();

        let summary = image_summary(Path::new("app.hex"), &image, 16);

        assert_eq!(summary["bytes"], 6);
        assert_eq!(summary["min_address"], 0);
        assert_eq!(summary["max_address"], 0x11);
        assert_eq!(summary["pages"], 2);
        let segments = summary["segments"]
            .as_array()
            .unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1]["start"], 0x10);
        assert_eq!(segments[1]["length"], 2);
    }

    #[test]
    fn test_image_summary_empty() {
        let image = MemoryImage::new();
        let summary = image_summary(Path::new("empty.hex"), &image, 128);
        assert_eq!(summary["bytes"], 0);
        assert!(summary["min_address"].is_null());
        assert_eq!(summary["pages"], 0);
    }
}
