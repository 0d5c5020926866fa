// frame_buffer.rs - The off-screen RGBA composite (SPEC_FULL.md §4.3).

use rand::Rng;
use tokio::sync::watch;

/// Holds composited RGBA pixels for one frame and notifies a watch channel
/// on every composite so an external compositor can re-read `pixels()`.
///
/// Writable only by the scheduler task; external readers must treat the
/// returned slice as read-only and valid until the next mutation.
pub struct FrameBuffer {
    width: u32,
    height: u32,
    primary: Vec<u8>,
    secondary: Option<Vec<u8>>,
    de_band: bool,
    update_tx: watch::Sender<u64>,
    update_rx: watch::Receiver<u64>,
    composite_count: u64,
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32, de_band: bool) -> Self {
        let len = width as usize * height as usize * 4;
        let (update_tx, update_rx) = watch::channel(0);
        let mut fb = Self {
            width,
            height,
            primary: vec![0u8; len],
            secondary: None,
            de_band: false,
            update_tx,
            update_rx,
            composite_count: 0,
        };
        fb.set_de_band(de_band);
        fb
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// The presented surface: the secondary (de-banded) buffer when the
    /// mode is enabled, otherwise the primary buffer.
    pub fn pixels(&self) -> &[u8] {
        match &self.secondary {
            Some(buf) if self.de_band => buf,
            _ => &self.primary,
        }
    }

    /// Subscribe to composite notifications. The carried value is a
    /// monotonic composite counter, not meaningful beyond "something
    /// changed".
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.update_rx.clone()
    }

    /// Enable or disable the de-band post-process (SPEC_FULL.md §4.3).
    /// Enabling on a populated buffer back-fills the secondary buffer from
    /// the primary; disabling just stops consulting it.
    pub fn set_de_band(&mut self, enabled: bool) {
        if enabled && self.secondary.is_none() {
            let mut secondary = self.primary.clone();
            apply_de_band_in_place(&self.primary, &mut secondary, self.width, self.height);
            self.secondary = Some(secondary);
        }
        self.de_band = enabled;
    }

    /// Composite a packed RGB byte stream into the frame at `(x, y)`
    /// (SPEC_FULL.md §4.3). `src` must have length `3 * w * h`.
    ///
    /// # Panics
    /// Panics if `src.len() != 3 * w * h` or the rectangle exceeds the
    /// buffer bounds; both are scheduler-internal invariants, never caused
    /// by untrusted input (the rectangle always comes from a `Block` this
    /// buffer's own generation produced).
    pub fn write_rect(&mut self, x: u32, y: u32, w: u32, h: u32, src: &[u8]) {
        assert_eq!(src.len(), 3 * w as usize * h as usize, "src length must be 3*w*h");
        assert!(x + w <= self.width && y + h <= self.height, "rect out of bounds");

        write_rgb_rect(&mut self.primary, self.width, x, y, w, h, src);

        if let Some(secondary) = &mut self.secondary {
            write_de_banded_rect(secondary, self.width, x, y, w, h, src);
        }

        self.composite_count += 1;
        let _ = self.update_tx.send(self.composite_count);
    }
}

fn write_rgb_rect(dst: &mut [u8], dst_width: u32, x: u32, y: u32, w: u32, h: u32, src: &[u8]) {
    for j in 0..h {
        for i in 0..w {
            let src_idx = (j * w + i) as usize * 3;
            let dst_idx = (((y + j) * dst_width + (x + i)) * 4) as usize;
            dst[dst_idx] = src[src_idx];
            dst[dst_idx + 1] = src[src_idx + 1];
            dst[dst_idx + 2] = src[src_idx + 2];
            dst[dst_idx + 3] = 255;
        }
    }
}

fn write_de_banded_rect(dst: &mut [u8], dst_width: u32, x: u32, y: u32, w: u32, h: u32, src: &[u8]) {
    let mut rng = rand::thread_rng();
    for j in 0..h {
        for i in 0..w {
            let src_idx = (j * w + i) as usize * 3;
            let dst_idx = (((y + j) * dst_width + (x + i)) * 4) as usize;
            let rgb = [src[src_idx], src[src_idx + 1], src[src_idx + 2]];
            let out = de_band_pixel(rgb, &mut rng);
            dst[dst_idx] = out[0];
            dst[dst_idx + 1] = out[1];
            dst[dst_idx + 2] = out[2];
            dst[dst_idx + 3] = 255;
        }
    }
}

/// Back-fill an entire secondary buffer from a primary RGBA buffer of the
/// same geometry (used when de-band is enabled on a populated buffer).
fn apply_de_band_in_place(primary: &[u8], secondary: &mut [u8], width: u32, height: u32) {
    let mut rng = rand::thread_rng();
    for py in 0..height {
        for px in 0..width {
            let idx = ((py * width + px) * 4) as usize;
            let rgb = [primary[idx], primary[idx + 1], primary[idx + 2]];
            let out = de_band_pixel(rgb, &mut rng);
            secondary[idx] = out[0];
            secondary[idx + 1] = out[1];
            secondary[idx + 2] = out[2];
            secondary[idx + 3] = 255;
        }
    }
}

/// The exact per-pixel de-band transform (SPEC_FULL.md §4.3): darker, more
/// saturated-green pixels get perturbed by a stronger per-channel uniform
/// noise, so large flat color fields don't band visibly.
fn de_band_pixel(rgb: [u8; 3], rng: &mut impl Rng) -> [u8; 3] {
    let [r, g, b] = [rgb[0] as f32, rgb[1] as f32, rgb[2] as f32];

    let denom = 0.5 * (r + b);
    let greenness = if denom > 0.0 { (g / denom).clamp(0.0, 1.0) } else { 1.0 };
    let darkness = 1.0 - (0.2126 * r + 0.7152 * g + 0.0722 * b) / 255.0;
    let band = greenness * darkness;
    let scale = 0.08 * band;

    let mut out = [0u8; 3];
    for (c, channel) in [r, g, b].into_iter().enumerate() {
        let u: f32 = rng.gen_range(0.0..1.0);
        let mean = u * scale + (1.0 - scale / 2.0);
        out[c] = (mean * channel).min(255.0).max(0.0) as u8;
    }
    out
}
