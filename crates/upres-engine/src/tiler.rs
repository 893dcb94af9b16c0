//! Tiled parallel scaling: extraction workers and the stitcher.
//!
//! Tiles are distributed to N worker threads through an atomic work
//! index; each worker extracts its tile (with overlap halo), resamples
//! it, and sends the result over a channel. The stitcher is the single
//! writer to the output canvas: it crops each arriving tile to its owned
//! region and pastes it. Tiles may complete in any order.
//!
//! Cancellation closes the work queue cooperatively: workers observe the
//! token between tiles, finish the tile in hand, and exit. The partial
//! canvas is discarded and all buffers drain back to the pool.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use tracing::{debug, info};
use upres_core::{CancellationToken, Error, Image, ProgressSender, Rect, Result, Stage, StageStats};
use upres_kernels::Algorithm;

use crate::backend::ScaleBackend;
use crate::grid::{TileGrid, TileSpec};
use crate::pool::{PoolHandle, PooledBuffer, ScaleBucket, UsageClass};

/// Default worker count when the caller does not configure one.
pub const DEFAULT_CONCURRENCY: usize = 6;

/// Upper bound on configurable workers.
pub const MAX_CONCURRENCY: usize = 16;

/// Tunables for tiled execution.
#[derive(Debug, Clone)]
pub struct TilerConfig {
    /// Requested worker count (clamped to 1..=[`MAX_CONCURRENCY`]).
    pub concurrency: usize,
    /// Deadline for any single tile to complete.
    pub tile_deadline: Duration,
}

impl Default for TilerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            tile_deadline: Duration::from_secs(120),
        }
    }
}

/// A processed tile travelling from a worker to the stitcher.
struct TileOut {
    spec: TileSpec,
    buffer: PooledBuffer,
}

/// Effective worker count: the lesser of the configured concurrency, what
/// the memory budget admits, and the tile count.
pub fn effective_workers(
    config: &TilerConfig,
    grid: &TileGrid,
    channels: u8,
    budget: u64,
) -> usize {
    let per_tile = grid.estimated_tile_bytes(channels).max(1);
    let by_memory = (budget / per_tile).max(1) as usize;
    config
        .concurrency
        .clamp(1, MAX_CONCURRENCY)
        .min(by_memory)
        .min(grid.total_tiles().max(1) as usize)
}

/// Scales `source` through the tile grid, returning the stitched canvas.
pub fn scale_tiled(
    source: &Image,
    grid: &TileGrid,
    algorithm: Algorithm,
    backend: &dyn ScaleBackend,
    pool: &PoolHandle,
    progress: &ProgressSender,
    cancel: &CancellationToken,
    config: &TilerConfig,
) -> Result<Image> {
    let channels = source.channels();
    let out_w = grid.output_width();
    let out_h = grid.output_height();
    let tiles = grid.tiles();
    let total = tiles.len();

    // Worker budget comes from the session pool, which carries any
    // caller override; the canvas claims its share first.
    let canvas_bytes = out_w as u64 * out_h as u64 * channels as u64 * 4;
    let safe_limit = pool.snapshot()?.safe_limit;
    let budget = safe_limit.saturating_sub(canvas_bytes);
    let workers = effective_workers(config, grid, channels, budget);

    info!(
        tiles_x = grid.tiles_x,
        tiles_y = grid.tiles_y,
        tile_size = grid.input_tile_size,
        overlap = grid.overlap_input,
        workers,
        "tiled scaling"
    );
    progress.emit_with_stats(
        Stage::Extracting,
        10.0,
        format!("processing {total} tiles with {workers} workers"),
        Some(StageStats {
            tiles_total: Some(total as u32),
            tiles_completed: Some(0),
            ..Default::default()
        }),
    );

    let mut canvas = acquire_with_retry(pool, UsageClass::Output, out_w, out_h, channels)?;

    let next = AtomicUsize::new(0);
    let abort = AtomicBool::new(false);
    let (results_tx, results_rx) = mpsc::channel::<(usize, Result<TileOut>)>();

    std::thread::scope(|scope| -> Result<()> {
        for _ in 0..workers {
            let pool = pool.clone();
            let results_tx = results_tx.clone();
            let next = &next;
            let abort = &abort;
            let tiles = &tiles;
            scope.spawn(move || {
                loop {
                    if cancel.is_cancelled() || abort.load(Ordering::Relaxed) {
                        break;
                    }
                    let idx = next.fetch_add(1, Ordering::Relaxed);
                    if idx >= tiles.len() {
                        break;
                    }
                    let spec = tiles[idx];
                    match process_tile(source, spec, algorithm, backend, &pool) {
                        Ok(out) => {
                            if results_tx.send((idx, Ok(out))).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            abort.store(true, Ordering::Relaxed);
                            let _ = results_tx.send((idx, Err(e)));
                            break;
                        }
                    }
                }
            });
        }
        // The stitcher holds the only remaining sender alive through the
        // workers; drop ours so disconnection is observable.
        drop(results_tx);

        stitch_loop(
            &mut canvas,
            out_w,
            channels,
            &results_rx,
            &tiles,
            &abort,
            cancel,
            progress,
            config.tile_deadline,
        )
    })?;

    progress.emit(Stage::Compositing, 90.0, "canvas assembled");

    // The finished canvas leaves the pool's domain with the caller.
    let data = canvas.detach();
    Image::from_data(out_w, out_h, channels, data)
}

/// Extracts, resamples, and returns one tile.
fn process_tile(
    source: &Image,
    spec: TileSpec,
    algorithm: Algorithm,
    backend: &dyn ScaleBackend,
    pool: &PoolHandle,
) -> Result<TileOut> {
    let channels = source.channels();
    let src_rect = spec.source;

    // Extraction buffer, retried once after a pool drain on budget
    // failure.
    let mut in_buf = acquire_with_retry(
        pool,
        UsageClass::Input,
        src_rect.width,
        src_rect.height,
        channels,
    )?;
    extract_into(source, src_rect, in_buf.as_mut_slice())?;
    let (tile_img, ticket) = in_buf.into_image(src_rect.width, src_rect.height, channels)?;

    let mut out_buf = acquire_with_retry(
        pool,
        UsageClass::Compute,
        spec.out_w,
        spec.out_h,
        channels,
    )?;
    let result = backend.resample_into(
        &tile_img,
        spec.out_w,
        spec.out_h,
        algorithm,
        out_buf.as_mut_slice(),
    );
    ticket.release(tile_img.into_data());
    result?;

    Ok(TileOut {
        spec,
        buffer: out_buf,
    })
}

/// Receives tiles until the canvas is complete.
#[allow(clippy::too_many_arguments)]
fn stitch_loop(
    canvas: &mut PooledBuffer,
    canvas_w: u32,
    channels: u8,
    results: &mpsc::Receiver<(usize, Result<TileOut>)>,
    tiles: &[TileSpec],
    abort: &AtomicBool,
    cancel: &CancellationToken,
    progress: &ProgressSender,
    deadline: Duration,
) -> Result<()> {
    let total = tiles.len();
    let mut completed = vec![false; total];
    let mut done = 0usize;
    let started = Instant::now();

    while done < total {
        match results.recv_timeout(deadline) {
            Ok((idx, Ok(tile))) => {
                if let Err(e) = paste_tile(canvas.as_mut_slice(), canvas_w, channels, &tile) {
                    abort.store(true, Ordering::Relaxed);
                    return Err(e);
                }
                drop(tile.buffer); // back to the pool
                completed[idx] = true;
                done += 1;

                let percent = 10.0 + 78.0 * done as f32 / total as f32;
                progress.emit_with_stats(
                    Stage::Processing,
                    percent,
                    format!("tile {done}/{total}"),
                    Some(StageStats {
                        tiles_total: Some(total as u32),
                        tiles_completed: Some(done as u32),
                        elapsed_ms: Some(started.elapsed().as_millis() as u64),
                        ..Default::default()
                    }),
                );
            }
            Ok((_, Err(e))) => {
                abort.store(true, Ordering::Relaxed);
                return Err(e);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                abort.store(true, Ordering::Relaxed);
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let stuck = completed.iter().position(|&c| !c).unwrap_or(0);
                return Err(Error::TileTimeout {
                    tx: tiles[stuck].tx,
                    ty: tiles[stuck].ty,
                    deadline_secs: deadline.as_secs(),
                });
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                // Workers are gone; either cancellation or a lost sender.
                return if cancel.is_cancelled() {
                    Err(Error::Cancelled)
                } else if done < total {
                    Err(Error::invariant(format!(
                        "workers exited with {done}/{total} tiles stitched"
                    )))
                } else {
                    Ok(())
                };
            }
        }
    }

    debug!(total, elapsed_ms = started.elapsed().as_millis() as u64, "all tiles stitched");
    Ok(())
}

/// Crops the tile to its owned region and pastes it into the canvas.
fn paste_tile(canvas: &mut [f32], canvas_w: u32, channels: u8, tile: &TileOut) -> Result<()> {
    let spec = &tile.spec;
    let owned = spec.owned_output();
    let c = channels as usize;

    let canvas_h = canvas.len() / (canvas_w as usize * c);
    if owned.right() > canvas_w || owned.bottom() as usize > canvas_h {
        return Err(Error::invariant(format!(
            "tile ({}, {}) paste {}x{}+{}+{} outside canvas",
            spec.tx, spec.ty, owned.width, owned.height, owned.x, owned.y
        )));
    }

    let src = tile.buffer.as_slice();
    let src_stride = spec.out_w as usize * c;
    let row_len = owned.width as usize * c;

    for row in 0..owned.height as usize {
        let src_y = spec.crop_top as usize + row;
        let src_start = src_y * src_stride + spec.crop_left as usize * c;
        let dst_y = owned.y as usize + row;
        let dst_start = dst_y * canvas_w as usize * c + owned.x as usize * c;
        canvas[dst_start..dst_start + row_len]
            .copy_from_slice(&src[src_start..src_start + row_len]);
    }
    Ok(())
}

/// Copies a source rectangle into a flat buffer.
fn extract_into(source: &Image, rect: Rect, out: &mut [f32]) -> Result<()> {
    if rect.right() > source.width() || rect.bottom() > source.height() {
        return Err(Error::invariant(format!(
            "extraction {}x{}+{}+{} outside {}x{} source",
            rect.width,
            rect.height,
            rect.x,
            rect.y,
            source.width(),
            source.height()
        )));
    }
    let c = source.channels() as usize;
    let row_len = rect.width as usize * c;
    let src_stride = source.width() as usize * c;
    let data = source.data();
    for row in 0..rect.height as usize {
        let src_start = (rect.y as usize + row) * src_stride + rect.x as usize * c;
        let dst_start = row * row_len;
        out[dst_start..dst_start + row_len]
            .copy_from_slice(&data[src_start..src_start + row_len]);
    }
    Ok(())
}

/// Image-shaped acquire with a single drain-and-retry on budget failure.
fn acquire_with_retry(
    pool: &PoolHandle,
    class: UsageClass,
    width: u32,
    height: u32,
    channels: u8,
) -> Result<PooledBuffer> {
    match pool.acquire_image(class, ScaleBucket::Generic, width, height, channels) {
        Ok(buf) => Ok(buf),
        Err(e) if e.is_out_of_budget() => {
            debug!("acquire over budget, draining pool and retrying once");
            pool.drain()?;
            pool.acquire_image(class, ScaleBucket::Generic, width, height, channels)
        }
        Err(e) => Err(e),
    }
}
