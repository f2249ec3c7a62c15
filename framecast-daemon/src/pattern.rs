//! Built-in test-pattern renderer.
//!
//! Paints moving colour stripes into a PNG per request. Stands in for a real
//! offscreen browser so the daemon can run end to end.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::{ImageBuffer, ImageFormat, Rgba};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use framecast_core::{
    FrameSubscription, OutputId, PushMetadata, PushedFrame, RenderError, Renderer, SurfaceHandle,
};

use crate::config::RendererConfig;

struct Surface {
    width: u32,
    height: u32,
    opened_at: Instant,
    streams: CancellationToken,
}

pub struct PatternRenderer {
    config: RendererConfig,
    surfaces: Mutex<HashMap<OutputId, Surface>>,
}

impl PatternRenderer {
    pub fn new(config: RendererConfig) -> Self {
        Self {
            config,
            surfaces: Mutex::new(HashMap::new()),
        }
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn lookup(
        &self,
        id: &OutputId,
    ) -> Result<(u32, u32, Instant, CancellationToken), RenderError> {
        let surfaces = self
            .surfaces
            .lock()
            .map_err(|_| RenderError::Other("surface table poisoned".into()))?;
        let s = surfaces
            .get(id)
            .ok_or_else(|| RenderError::NoSurface(id.clone()))?;
        Ok((s.width, s.height, s.opened_at, s.streams.clone()))
    }
}

#[async_trait]
impl Renderer for PatternRenderer {
    async fn allocate_surface(
        &self,
        id: &OutputId,
        width: u32,
        height: u32,
        target: &str,
    ) -> Result<SurfaceHandle, RenderError> {
        let mut surfaces = self
            .surfaces
            .lock()
            .map_err(|_| RenderError::Other("surface table poisoned".into()))?;
        if let Some(old) = surfaces.insert(
            id.clone(),
            Surface {
                width,
                height,
                opened_at: Instant::now(),
                streams: CancellationToken::new(),
            },
        ) {
            old.streams.cancel();
        }
        info!(output = %id, target, "pattern surface {width}x{height}");
        Ok(SurfaceHandle {
            id: id.clone(),
            width,
            height,
        })
    }

    async fn capture_still(&self, id: &OutputId) -> Result<Option<Bytes>, RenderError> {
        let (width, height, opened_at, _) = self.lookup(id)?;
        if self.config.paint_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.paint_delay_ms)).await;
        }
        let tick = opened_at.elapsed().as_millis() as u64 / 16;
        let stripe = self.config.stripe_width;
        let png = tokio::task::spawn_blocking(move || paint(width, height, stripe, tick))
            .await
            .map_err(|e| RenderError::Other(format!("paint task failed: {e}")))??;
        Ok(Some(png))
    }

    async fn subscribe_stream(
        &self,
        id: &OutputId,
        max_rate: u32,
    ) -> Result<FrameSubscription, RenderError> {
        if !self.config.streaming {
            return Err(RenderError::StreamingUnsupported);
        }
        let (width, height, opened_at, streams) = self.lookup(id)?;
        let (subscription, mut publisher) = FrameSubscription::channel();
        let interval = framecast_core::config::frame_interval(max_rate);
        let stripe = self.config.stripe_width;
        let id = id.clone();

        tokio::spawn(async move {
            let mut sequence = 0;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = streams.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let tick = opened_at.elapsed().as_millis() as u64 / 16;
                let painted =
                    tokio::task::spawn_blocking(move || paint(width, height, stripe, tick)).await;
                let data = match painted {
                    Ok(Ok(data)) => data,
                    _ => continue,
                };
                sequence += 1;
                let frame = PushedFrame {
                    data,
                    metadata: PushMetadata {
                        sequence,
                        device_width: width,
                        device_height: height,
                    },
                };
                if !publisher.push(frame).await {
                    break;
                }
            }
            debug!(output = %id, frames = sequence, "pattern stream ended");
        });
        Ok(subscription)
    }

    async fn release_surface(&self, id: &OutputId) {
        let removed = match self.surfaces.lock() {
            Ok(mut surfaces) => surfaces.remove(id),
            Err(_) => None,
        };
        if let Some(surface) = removed {
            surface.streams.cancel();
            debug!(output = %id, "pattern surface released");
        }
    }
}

/// Diagonal stripes that drift by one pixel per tick.
fn paint(width: u32, height: u32, stripe: u32, tick: u64) -> Result<Bytes, RenderError> {
    let stripe = stripe.max(1);
    let img: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::from_fn(width, height, |x, y| {
        let band = ((x + y) as u64 + tick) / stripe as u64;
        let shade = ((band * 47) % 256) as u8;
        Rgba([shade, shade.wrapping_mul(3), 255 - shade, 255])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .map_err(|e| RenderError::Other(format!("png encode: {e}")))?;
    Ok(Bytes::from(out.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use framecast_core::PixelDecoder;

    fn renderer(streaming: bool) -> PatternRenderer {
        PatternRenderer::new(RendererConfig {
            streaming,
            ..RendererConfig::default()
        })
    }

    #[tokio::test]
    async fn still_decodes_to_surface_geometry() {
        let r = renderer(false);
        let id = OutputId::from("a");
        r.allocate_surface(&id, 64, 48, "/output/a").await.unwrap();

        let png = r.capture_still(&id).await.unwrap().unwrap();
        let image = PixelDecoder.decode(&png).unwrap();
        assert_eq!((image.width, image.height), (64, 48));
        assert_eq!(image.pixels.len(), 64 * 48 * 4);
    }

    #[tokio::test]
    async fn capture_without_surface_fails() {
        let r = renderer(false);
        let err = r.capture_still(&"ghost".into()).await.unwrap_err();
        assert!(matches!(err, RenderError::NoSurface(_)));
    }

    #[tokio::test]
    async fn streaming_can_be_disabled() {
        let r = renderer(false);
        let id = OutputId::from("a");
        r.allocate_surface(&id, 32, 32, "").await.unwrap();
        assert!(matches!(
            r.subscribe_stream(&id, 30).await,
            Err(RenderError::StreamingUnsupported)
        ));
    }

    #[tokio::test]
    async fn stream_delivers_until_surface_released() {
        let r = renderer(true);
        let id = OutputId::from("a");
        r.allocate_surface(&id, 32, 32, "").await.unwrap();

        let mut sub = r.subscribe_stream(&id, 60).await.unwrap();
        for expected in 1..=3 {
            let frame = sub.next().await.unwrap();
            assert_eq!(frame.metadata.sequence, expected);
            sub.ack(frame.metadata.sequence).await.unwrap();
        }

        r.release_surface(&id).await;
        assert_eq!(r.surface_count(), 0);
        // Drain anything painted before the release landed.
        while let Some(frame) = sub.next().await {
            let _ = sub.ack(frame.metadata.sequence).await;
        }
    }
}
