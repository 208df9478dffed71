//! Polled operator exit key.

/// Virtual-key code for Escape.
pub const VK_ESCAPE: u16 = 0x1B;

/// Key whose state is polled once per frame to stop recording.
#[derive(Debug, Clone, Copy)]
pub struct ExitKey {
    #[cfg_attr(not(target_os = "windows"), allow(dead_code))]
    virtual_key: u16,
}

impl ExitKey {
    pub fn new(virtual_key: u16) -> Self {
        Self { virtual_key }
    }

    pub fn escape() -> Self {
        Self::new(VK_ESCAPE)
    }

    /// Non-blocking poll. Any non-zero async key state counts, including the
    /// "pressed since last poll" bit, so a tap between two frames is not missed.
    #[cfg(target_os = "windows")]
    pub fn is_pressed(&self) -> bool {
        use windows::Win32::UI::Input::KeyboardAndMouse::GetAsyncKeyState;

        let state = unsafe { GetAsyncKeyState(self.virtual_key as i32) };
        state != 0
    }

    #[cfg(not(target_os = "windows"))]
    pub fn is_pressed(&self) -> bool {
        false
    }
}

impl Default for ExitKey {
    fn default() -> Self {
        Self::escape()
    }
}
