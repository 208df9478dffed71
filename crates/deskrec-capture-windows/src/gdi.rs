//! Win32 GDI primary-display capture with cursor overlay.
//!
//! # Handle ownership
//!
//! Each frame acquires a screen DC, a memory DC, a compatible bitmap, a brush
//! and possibly the cursor's icon bitmaps. All of them are held by guards
//! below; drop order (reverse declaration order) restores the previous
//! selection before the bitmap and DCs are released.

use deskrec_core::{CaptureError, FrameBuffer, Resolution};
use windows::Win32::{
    Foundation::{COLORREF, HWND, RECT},
    Graphics::Gdi::{
        BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, CreateSolidBrush, DeleteDC,
        DeleteObject, FrameRect, GetDC, GetDIBits, ReleaseDC, SelectObject, BITMAPINFO,
        BITMAPINFOHEADER, BI_RGB, DIB_RGB_COLORS, HBITMAP, HBRUSH, HDC, HGDIOBJ, SRCCOPY,
    },
    UI::{
        HiDpi::{SetProcessDpiAwarenessContext, DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2},
        WindowsAndMessaging::{
            DrawIconEx, GetCursorInfo, GetIconInfo, GetSystemMetrics, CURSORINFO,
            CURSOR_SHOWING, DI_NORMAL, HICON, ICONINFO, SM_CXSCREEN, SM_CYSCREEN,
        },
    },
};

use super::{CaptureConfig, FrameSource};

/// Annotation border colour (COLORREF is 0x00BBGGRR).
const BORDER_COLOR: COLORREF = COLORREF(0x0000_00FF);

// ── ScreenCapturer ─────────────────────────────────────────────────────────────

pub struct ScreenCapturer {
    config:     CaptureConfig,
    resolution: Resolution,
}

impl ScreenCapturer {
    /// Read the primary display size. Fails if the system reports no display.
    pub fn open(config: CaptureConfig) -> Result<Self, CaptureError> {
        // Physical pixels rather than DPI-virtualised ones; already-set
        // awareness (manifest or earlier call) is fine.
        if let Err(e) = unsafe {
            SetProcessDpiAwarenessContext(DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2)
        } {
            tracing::debug!("[GdiCapture] SetProcessDpiAwarenessContext: {e}");
        }

        let width = unsafe { GetSystemMetrics(SM_CXSCREEN) };
        let height = unsafe { GetSystemMetrics(SM_CYSCREEN) };
        if width <= 0 || height <= 0 {
            return Err(CaptureError::DisplayUnavailable);
        }
        let resolution = Resolution::new(width as u32, height as u32);

        tracing::info!(
            "[GdiCapture] primary display {} border={}px cursor={}",
            resolution, config.border_px, config.draw_cursor
        );
        Ok(Self { config, resolution })
    }

    fn draw_border(&self, hdc: HDC) -> Result<(), CaptureError> {
        if self.config.border_px == 0 {
            return Ok(());
        }
        let brush = GdiObject::new(unsafe { CreateSolidBrush(BORDER_COLOR) }.0, "CreateSolidBrush")?;
        let brush = HBRUSH(brush.raw());

        let Resolution { width, height } = self.resolution;
        let inset_limit = (width.min(height) / 2) as i32;
        for inset in 0..(self.config.border_px as i32).min(inset_limit) {
            let rect = RECT {
                left:   inset,
                top:    inset,
                right:  width as i32 - inset,
                bottom: height as i32 - inset,
            };
            unsafe { FrameRect(hdc, &rect, brush) };
        }
        Ok(())
    }

    /// Draw the current cursor icon at its hotspot-adjusted position.
    /// A hidden cursor or a failed cursor query leaves the frame untouched.
    fn draw_cursor(&self, hdc: HDC) {
        let mut info = CURSORINFO {
            cbSize: std::mem::size_of::<CURSORINFO>() as u32,
            ..Default::default()
        };
        if unsafe { GetCursorInfo(&mut info) }.is_err() {
            return;
        }
        if info.flags.0 & CURSOR_SHOWING.0 == 0 {
            return;
        }

        let icon = HICON(info.hCursor.0);
        let mut icon_info = ICONINFO::default();
        if unsafe { GetIconInfo(icon, &mut icon_info) }.is_err() {
            return;
        }
        let _icon_bitmaps = IconBitmaps(icon_info);

        let x = info.ptScreenPos.x - icon_info.xHotspot as i32;
        let y = info.ptScreenPos.y - icon_info.yHotspot as i32;
        if let Err(e) =
            unsafe { DrawIconEx(hdc, x, y, icon, 0, 0, 0, HBRUSH::default(), DI_NORMAL) }
        {
            tracing::trace!("[GdiCapture] DrawIconEx: {e}");
        }
    }
}

impl FrameSource for ScreenCapturer {
    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn capture_into(&mut self, buffer: &mut FrameBuffer) -> Result<(), CaptureError> {
        let Resolution { width, height } = self.resolution;
        let (w, h) = (width as i32, height as i32);

        let screen = ScreenDc::acquire()?;
        let memory = MemoryDc::create(screen.0)?;
        let bitmap = GdiObject::new(
            unsafe { CreateCompatibleBitmap(screen.0, w, h) }.0,
            "CreateCompatibleBitmap",
        )?;
        let selection = Selection::select(memory.0, bitmap.raw())?;

        unsafe { BitBlt(memory.0, 0, 0, w, h, screen.0, 0, 0, SRCCOPY) }
            .map_err(|e| CaptureError::Win32 { call: "BitBlt", reason: e.to_string() })?;

        self.draw_border(memory.0)?;
        if self.config.draw_cursor {
            self.draw_cursor(memory.0);
        }

        // GetDIBits requires the bitmap not to be selected into a DC.
        drop(selection);

        let mut bmi = BITMAPINFO {
            bmiHeader: BITMAPINFOHEADER {
                biSize:        std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                biWidth:       w,
                biHeight:      -h, // negative: top-down rows
                biPlanes:      1,
                biBitCount:    32,
                biCompression: BI_RGB.0,
                ..Default::default()
            },
            ..Default::default()
        };

        let pixels = buffer.prepare(self.resolution);
        let lines = unsafe {
            GetDIBits(
                memory.0,
                HBITMAP(bitmap.raw()),
                0,
                height,
                Some(pixels.as_mut_ptr().cast()),
                &mut bmi,
                DIB_RGB_COLORS,
            )
        };
        if lines != h {
            return Err(CaptureError::Gdi { call: "GetDIBits" });
        }
        Ok(())
    }
}

// ── Scoped GDI guards ─────────────────────────────────────────────────────────

/// Screen device context from `GetDC(NULL)`, released with `ReleaseDC`.
struct ScreenDc(HDC);

impl ScreenDc {
    fn acquire() -> Result<Self, CaptureError> {
        let hdc = unsafe { GetDC(HWND::default()) };
        if hdc.is_invalid() {
            return Err(CaptureError::Gdi { call: "GetDC" });
        }
        Ok(Self(hdc))
    }
}

impl Drop for ScreenDc {
    fn drop(&mut self) {
        unsafe { ReleaseDC(HWND::default(), self.0) };
    }
}

/// Memory device context, deleted with `DeleteDC`.
struct MemoryDc(HDC);

impl MemoryDc {
    fn create(compatible_with: HDC) -> Result<Self, CaptureError> {
        let hdc = unsafe { CreateCompatibleDC(compatible_with) };
        if hdc.is_invalid() {
            return Err(CaptureError::Gdi { call: "CreateCompatibleDC" });
        }
        Ok(Self(hdc))
    }
}

impl Drop for MemoryDc {
    fn drop(&mut self) {
        let _ = unsafe { DeleteDC(self.0) };
    }
}

/// Any GDI object (bitmap, brush) deleted with `DeleteObject`.
struct GdiObject(HGDIOBJ);

impl GdiObject {
    fn new(raw: *mut core::ffi::c_void, call: &'static str) -> Result<Self, CaptureError> {
        let object = HGDIOBJ(raw);
        if object.is_invalid() {
            return Err(CaptureError::Gdi { call });
        }
        Ok(Self(object))
    }

    fn raw(&self) -> *mut core::ffi::c_void {
        self.0 .0
    }
}

impl Drop for GdiObject {
    fn drop(&mut self) {
        let _ = unsafe { DeleteObject(self.0) };
    }
}

/// Object selected into a DC; the previous selection is restored on drop.
struct Selection {
    hdc:      HDC,
    previous: HGDIOBJ,
}

impl Selection {
    fn select(hdc: HDC, object: *mut core::ffi::c_void) -> Result<Self, CaptureError> {
        let previous = unsafe { SelectObject(hdc, HGDIOBJ(object)) };
        if previous.is_invalid() {
            return Err(CaptureError::Gdi { call: "SelectObject" });
        }
        Ok(Self { hdc, previous })
    }
}

impl Drop for Selection {
    fn drop(&mut self) {
        unsafe { SelectObject(self.hdc, self.previous) };
    }
}

/// Bitmaps `GetIconInfo` hands to the caller (`hbmColor` is null for
/// monochrome cursors).
struct IconBitmaps(ICONINFO);

impl Drop for IconBitmaps {
    fn drop(&mut self) {
        for bitmap in [self.0.hbmColor, self.0.hbmMask] {
            if !bitmap.is_invalid() {
                let _ = unsafe { DeleteObject(HGDIOBJ(bitmap.0)) };
            }
        }
    }
}
