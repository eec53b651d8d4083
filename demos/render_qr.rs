//! Render a reveal QR code with a generated marker and save it as PNG and SVG
//!
//! Usage: cargo run --example render_qr

use image::{Rgba, RgbaImage};
use revealqr::{
    ExportArtifact, MarkerImage, OverlaySpec, Rasterizer, ReflectionPayload, RenderedScene,
    SymbolSpec, VectorCodeRenderer,
};

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let payload = ReflectionPayload::for_event("https://example.org/qr/", "42")?;
    let spec = SymbolSpec::new(payload, 300).with_overlay(OverlaySpec {
        width: 120,
        height: 120,
        excavate: true,
        href: None,
    });

    let scene = VectorCodeRenderer::new().render(&spec)?;
    std::fs::write("reveal_qr.svg", scene.to_svg())?;
    println!("✓ Vector symbol saved to reveal_qr.svg");

    // A pink disc stands in for the marker asset
    let marker = RgbaImage::from_fn(120, 120, |x, y| {
        let (dx, dy) = (x as i32 - 60, y as i32 - 60);
        if dx * dx + dy * dy <= 55 * 55 {
            Rgba([236, 72, 153, 255])
        } else {
            Rgba([0, 0, 0, 0])
        }
    });

    let pixels = Rasterizer::new().rasterize(RenderedScene::new(
        scene,
        Some(MarkerImage::from_rgba(marker)),
    ))?;
    let artifact = ExportArtifact::encode_png(&pixels, "qrcode.png")?;
    std::fs::write(&artifact.suggested_file_name, &artifact.bytes)?;

    println!(
        "✓ {}x{} PNG saved to {} ({} bytes)",
        artifact.width,
        artifact.height,
        artifact.suggested_file_name,
        artifact.len()
    );

    Ok(())
}
