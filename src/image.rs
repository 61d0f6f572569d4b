use std::io::Cursor;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use percent_encoding::percent_decode_str;
use resvg::{tiny_skia, usvg};
use thiserror::Error;
use tracing::debug;

use crate::registry::params::{CreateImageParams, CreateRectangleParams, Rgb, SolidPaint};

/// Raster formats the design host accepts as image fills.
const ACCEPTED_FORMATS: &[&str] = &["image/png", "image/jpeg", "image/gif"];

/// Density multiplier applied when rasterizing vector input, so the host
/// gets more pixels than the on-canvas size.
const VECTOR_SUPERSAMPLE: f64 = 2.0;

/// Some CDNs reject anonymous agents, so remote fetches always identify
/// themselves.
const FETCH_USER_AGENT: &str = "canvas-bridge/0.1";

// ── Failure reasons ─────────────────────────────────────────────

/// Terminal reason an image reference could not be turned into host-accepted
/// bytes. Feeds the placeholder path; never propagates as a panic.
#[derive(Debug, Error)]
pub enum ImageFailure {
    #[error("request timed out")]
    Timeout,
    #[error("HTTP {status}")]
    HttpStatus { status: u16 },
    #[error("fetch failed: {message}")]
    Network { message: String },
    #[error("not an image: {content_type}")]
    NotAnImage { content_type: String },
    #[error("empty image response")]
    EmptyBody,
    #[error("invalid data URI")]
    MalformedDataUri,
    #[error("failed to decode image data: {message}")]
    Decode { message: String },
    #[error("failed to convert {from} to PNG: {message}")]
    Transcode { from: String, message: String },
}

/// Fully resolved and normalized image: raw bytes in a host-accepted format
/// plus their content type. Never partially valid.
#[derive(Debug, Clone)]
pub struct ResolvedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

// ── Pipeline ────────────────────────────────────────────────────

/// Resolve an image reference to host-accepted bytes: classify, fetch or
/// decode, then normalize. `width`/`height` are the on-canvas target
/// dimensions, used only for vector rasterization.
pub async fn resolve(
    reference: &str,
    width: f64,
    height: f64,
    timeout: Duration,
) -> Result<ResolvedImage, ImageFailure> {
    let (content_type, bytes) = if reference.starts_with("data:") {
        decode_data_uri(reference)?
    } else {
        fetch_remote(reference, timeout).await?
    };
    normalize(&content_type, bytes, width, height)
}

/// Parse a `data:<mime>[;base64],<data>` reference into content type and
/// raw bytes. Literal (non-base64) data is percent-decoded, the common
/// encoding for inline SVG.
fn decode_data_uri(reference: &str) -> Result<(String, Vec<u8>), ImageFailure> {
    let rest = reference
        .strip_prefix("data:")
        .ok_or(ImageFailure::MalformedDataUri)?;
    let (header, data) = rest.split_once(',').ok_or(ImageFailure::MalformedDataUri)?;
    let (mime, base64_encoded) = match header.strip_suffix(";base64") {
        Some(mime) => (mime, true),
        None => (header, false),
    };
    let mime = if mime.is_empty() { "image/png" } else { mime };
    if !mime.starts_with("image/") {
        return Err(ImageFailure::NotAnImage {
            content_type: mime.to_string(),
        });
    }

    let bytes = if base64_encoded {
        BASE64
            .decode(data.trim())
            .map_err(|e| ImageFailure::Decode {
                message: e.to_string(),
            })?
    } else {
        percent_decode_str(data).collect()
    };
    if bytes.is_empty() {
        return Err(ImageFailure::EmptyBody);
    }
    Ok((mime.to_string(), bytes))
}

/// Bounded-time GET with redirect following. A timeout is reported as its
/// own failure reason; every other transport problem is a network failure.
async fn fetch_remote(url: &str, timeout: Duration) -> Result<(String, Vec<u8>), ImageFailure> {
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(10))
        .user_agent(FETCH_USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| ImageFailure::Network {
            message: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(classify_fetch_error)?;
    let status = response.status();
    if !status.is_success() {
        return Err(ImageFailure::HttpStatus {
            status: status.as_u16(),
        });
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if !content_type.starts_with("image/") {
        return Err(ImageFailure::NotAnImage { content_type });
    }

    let bytes = response.bytes().await.map_err(classify_fetch_error)?;
    if bytes.is_empty() {
        return Err(ImageFailure::EmptyBody);
    }
    debug!(url, len = bytes.len(), %content_type, "image fetched");
    Ok((content_type, bytes.to_vec()))
}

fn classify_fetch_error(error: reqwest::Error) -> ImageFailure {
    if error.is_timeout() {
        ImageFailure::Timeout
    } else {
        ImageFailure::Network {
            message: error.to_string(),
        }
    }
}

/// Bring the resolved bytes into a format the host accepts. Vector input is
/// rasterized at 2× the target size; non-accepted rasters are re-encoded as
/// PNG without resizing; accepted formats pass through untouched.
fn normalize(
    content_type: &str,
    bytes: Vec<u8>,
    width: f64,
    height: f64,
) -> Result<ResolvedImage, ImageFailure> {
    let base = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim();

    if base == "image/svg+xml" {
        let png = rasterize_svg(
            &bytes,
            width * VECTOR_SUPERSAMPLE,
            height * VECTOR_SUPERSAMPLE,
        )?;
        return Ok(ResolvedImage {
            bytes: png,
            mime_type: "image/png".to_string(),
        });
    }

    if ACCEPTED_FORMATS.contains(&base) {
        return Ok(ResolvedImage {
            bytes,
            mime_type: base.to_string(),
        });
    }

    // Non-accepted raster (WebP and friends): decode and re-encode as PNG.
    let transcode_failure = |message: String| ImageFailure::Transcode {
        from: base.to_string(),
        message,
    };
    let decoded =
        image::load_from_memory(&bytes).map_err(|e| transcode_failure(e.to_string()))?;
    let mut png = Cursor::new(Vec::new());
    decoded
        .write_to(&mut png, image::ImageFormat::Png)
        .map_err(|e| transcode_failure(e.to_string()))?;
    Ok(ResolvedImage {
        bytes: png.into_inner(),
        mime_type: "image/png".to_string(),
    })
}

/// Render an SVG to a PNG of exactly `width`×`height` pixels, stretching the
/// document to fill the target.
fn rasterize_svg(data: &[u8], width: f64, height: f64) -> Result<Vec<u8>, ImageFailure> {
    let failure = |message: String| ImageFailure::Transcode {
        from: "image/svg+xml".to_string(),
        message,
    };

    let tree = usvg::Tree::from_data(data, &usvg::Options::default())
        .map_err(|e| failure(e.to_string()))?;
    let target_width = width.round().max(1.0) as u32;
    let target_height = height.round().max(1.0) as u32;
    let mut pixmap = tiny_skia::Pixmap::new(target_width, target_height)
        .ok_or_else(|| failure("zero-sized raster target".to_string()))?;

    let size = tree.size();
    let scale_x = target_width as f32 / size.width();
    let scale_y = target_height as f32 / size.height();
    resvg::render(
        &tree,
        tiny_skia::Transform::from_scale(scale_x, scale_y),
        &mut pixmap.as_mut(),
    );

    pixmap.encode_png().map_err(|e| failure(e.to_string()))
}

// ── Placeholder ─────────────────────────────────────────────────

/// Substitute command used when ingestion fails and the caller's policy
/// allows masking it: a light grey rectangle with a hairline border in the
/// image's slot.
pub fn placeholder_rectangle(params: &CreateImageParams) -> CreateRectangleParams {
    CreateRectangleParams {
        x: params.x,
        y: params.y,
        width: params.width,
        height: params.height,
        fills: Some(vec![SolidPaint::new(Rgb {
            r: 0.9,
            g: 0.9,
            b: 0.9,
        })]),
        corner_radius: params.corner_radius,
        strokes: Some(vec![SolidPaint::new(Rgb {
            r: 0.8,
            g: 0.8,
            b: 0.8,
        })]),
        stroke_weight: Some(1.0),
        name: Some(match &params.name {
            Some(name) => format!("{name} (placeholder)"),
            None => "Image placeholder".to_string(),
        }),
        parent_id: params.parent_id.clone(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    const SVG_100: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="100"><rect width="100" height="100" fill="#ff0000"/></svg>"##;

    fn png_bytes() -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image::RgbaImage::from_pixel(2, 2, image::Rgba([0, 128, 255, 255]))
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn test_inline_base64_png_passes_through_unchanged() {
        let original = png_bytes();
        let reference = format!("data:image/png;base64,{}", BASE64.encode(&original));

        let resolved = resolve(&reference, 50.0, 50.0, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(resolved.mime_type, "image/png");
        assert_eq!(resolved.bytes, original);
    }

    #[tokio::test]
    async fn test_svg_rasterizes_at_twice_target_size() {
        let reference = format!("data:image/svg+xml;base64,{}", BASE64.encode(SVG_100));

        let resolved = resolve(&reference, 100.0, 100.0, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(resolved.mime_type, "image/png");

        let decoded = image::load_from_memory(&resolved.bytes).unwrap();
        assert_eq!(decoded.width(), 200);
        assert_eq!(decoded.height(), 200);
    }

    #[tokio::test]
    async fn test_percent_escaped_svg_decodes() {
        let escaped: String = percent_encoding::utf8_percent_encode(
            SVG_100,
            percent_encoding::NON_ALPHANUMERIC,
        )
        .to_string();
        let reference = format!("data:image/svg+xml,{escaped}");

        let resolved = resolve(&reference, 10.0, 10.0, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(resolved.mime_type, "image/png");
        let decoded = image::load_from_memory(&resolved.bytes).unwrap();
        assert_eq!(decoded.width(), 20);
    }

    #[tokio::test]
    async fn test_data_uri_default_mime_is_png() {
        let original = png_bytes();
        let reference = format!("data:;base64,{}", BASE64.encode(&original));

        let resolved = resolve(&reference, 1.0, 1.0, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(resolved.mime_type, "image/png");
        assert_eq!(resolved.bytes, original);
    }

    #[tokio::test]
    async fn test_malformed_and_non_image_data_uris_fail() {
        let no_comma = resolve("data:image/png;base64", 1.0, 1.0, Duration::from_secs(1)).await;
        assert!(matches!(no_comma, Err(ImageFailure::MalformedDataUri)));

        let not_image = resolve("data:text/plain,hello", 1.0, 1.0, Duration::from_secs(1)).await;
        assert!(matches!(not_image, Err(ImageFailure::NotAnImage { .. })));

        let bad_base64 = resolve(
            "data:image/png;base64,@@not-base64@@",
            1.0,
            1.0,
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(bad_base64, Err(ImageFailure::Decode { .. })));
    }

    #[test]
    fn test_unsupported_raster_reencodes_to_png() {
        // BMP is not in the accepted set and must come back as PNG with the
        // same pixel dimensions.
        let mut bmp = Cursor::new(Vec::new());
        image::RgbaImage::from_pixel(3, 5, image::Rgba([1, 2, 3, 255]))
            .write_to(&mut bmp, image::ImageFormat::Bmp)
            .unwrap();

        let resolved = normalize("image/bmp", bmp.into_inner(), 3.0, 5.0).unwrap();
        assert_eq!(resolved.mime_type, "image/png");
        let decoded = image::load_from_memory(&resolved.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (3, 5));
    }

    #[test]
    fn test_content_type_parameters_are_ignored() {
        let original = png_bytes();
        let resolved =
            normalize("image/png; charset=binary", original.clone(), 1.0, 1.0).unwrap();
        assert_eq!(resolved.mime_type, "image/png");
        assert_eq!(resolved.bytes, original);
    }

    #[test]
    fn test_placeholder_rectangle_mirrors_request() {
        let params = CreateImageParams {
            url: "https://example.com/x.png".to_string(),
            x: 5.0,
            y: 6.0,
            width: 70.0,
            height: 80.0,
            name: Some("Banner".to_string()),
            corner_radius: Some(8.0),
            scale_mode: Default::default(),
            parent_id: Some("0:1".to_string()),
            use_placeholder_on_error: true,
            timeout_ms: 1_000,
        };

        let substitute = placeholder_rectangle(&params);
        assert_eq!(substitute.name.as_deref(), Some("Banner (placeholder)"));
        assert_eq!((substitute.x, substitute.y), (5.0, 6.0));
        assert_eq!((substitute.width, substitute.height), (70.0, 80.0));
        assert_eq!(substitute.corner_radius, Some(8.0));
        assert_eq!(substitute.parent_id.as_deref(), Some("0:1"));
        assert_eq!(substitute.stroke_weight, Some(1.0));

        let unnamed = CreateImageParams {
            name: None,
            ..params
        };
        assert_eq!(
            placeholder_rectangle(&unnamed).name.as_deref(),
            Some("Image placeholder")
        );
    }
}
