//! Screen capture and input injection backends
//!
//! The RPC surface acts on the desktop through this trait. The default
//! backend is headless: it serves a synthetic screenshot and logs input
//! instead of injecting it, which keeps the agent runnable in CI and
//! behind stub SUTs. The `native` feature swaps in real capture and
//! injection via `xcap` and `enigo`.

use playtest_common::protocol::MouseButton;
use playtest_common::{Error, Result};
use std::time::Duration;
use tracing::info;

/// Desktop I/O seam used by the action and screenshot endpoints.
pub trait Desktop: Send + Sync {
    /// Capture the whole screen as PNG bytes.
    fn capture_screen(&self) -> Result<Vec<u8>>;

    /// Move the pointer to absolute coordinates over `duration`.
    fn move_mouse(&self, x: i32, y: i32, duration: Duration) -> Result<()>;

    /// Click at the current pointer position.
    fn click(&self, button: MouseButton) -> Result<()>;

    /// Double-click at absolute coordinates.
    fn double_click(&self, x: i32, y: i32, button: MouseButton) -> Result<()>;

    /// Press and release a named key.
    fn press_key(&self, key: &str) -> Result<()>;

    /// Press a key combination simultaneously.
    fn hotkey(&self, keys: &[String]) -> Result<()>;
}

/// Logging no-op backend with a synthetic 1920x1080 screen.
pub struct HeadlessDesktop {
    width: u32,
    height: u32,
}

impl Default for HeadlessDesktop {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

impl HeadlessDesktop {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Desktop for HeadlessDesktop {
    fn capture_screen(&self) -> Result<Vec<u8>> {
        let img = image::RgbaImage::from_pixel(
            self.width,
            self.height,
            image::Rgba([16, 16, 16, 255]),
        );
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png)
            .map_err(|e| Error::Image(e.to_string()))?;
        Ok(buf.into_inner())
    }

    fn move_mouse(&self, x: i32, y: i32, duration: Duration) -> Result<()> {
        info!("headless: move to ({}, {}) over {:?}", x, y, duration);
        Ok(())
    }

    fn click(&self, button: MouseButton) -> Result<()> {
        info!("headless: {}-click", button.as_str());
        Ok(())
    }

    fn double_click(&self, x: i32, y: i32, button: MouseButton) -> Result<()> {
        info!("headless: double-{}-click at ({}, {})", button.as_str(), x, y);
        Ok(())
    }

    fn press_key(&self, key: &str) -> Result<()> {
        info!("headless: press key '{}'", key);
        Ok(())
    }

    fn hotkey(&self, keys: &[String]) -> Result<()> {
        info!("headless: hotkey {}", keys.join("+"));
        Ok(())
    }
}

#[cfg(feature = "native")]
pub use native::NativeDesktop;

#[cfg(feature = "native")]
mod native {
    use super::*;
    use enigo::{Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};
    use std::sync::Mutex;

    /// Real capture and injection backend.
    ///
    /// Enigo's handle is not Sync, so it lives behind a mutex; input is
    /// serialized, which matches the single-controller assumption.
    pub struct NativeDesktop {
        enigo: Mutex<Enigo>,
    }

    impl NativeDesktop {
        pub fn new() -> Result<Self> {
            let enigo = Enigo::new(&Settings::default())
                .map_err(|e| Error::Internal(format!("input backend init failed: {}", e)))?;
            Ok(Self {
                enigo: Mutex::new(enigo),
            })
        }

        fn with_enigo<T>(&self, f: impl FnOnce(&mut Enigo) -> std::result::Result<T, enigo::InputError>) -> Result<T> {
            let mut enigo = self
                .enigo
                .lock()
                .map_err(|_| Error::Internal("input backend poisoned".to_string()))?;
            f(&mut enigo).map_err(|e| Error::Internal(format!("input injection failed: {}", e)))
        }
    }

    fn button(b: MouseButton) -> Button {
        match b {
            MouseButton::Left => Button::Left,
            MouseButton::Right => Button::Right,
        }
    }

    fn named_key(name: &str) -> Key {
        match name.to_lowercase().as_str() {
            "escape" | "esc" => Key::Escape,
            "enter" | "return" => Key::Return,
            "space" => Key::Space,
            "tab" => Key::Tab,
            "backspace" => Key::Backspace,
            "delete" => Key::Delete,
            "up" => Key::UpArrow,
            "down" => Key::DownArrow,
            "left" => Key::LeftArrow,
            "right" => Key::RightArrow,
            "ctrl" | "control" => Key::Control,
            "alt" => Key::Alt,
            "shift" => Key::Shift,
            "f1" => Key::F1,
            "f2" => Key::F2,
            "f3" => Key::F3,
            "f4" => Key::F4,
            "f5" => Key::F5,
            "f10" => Key::F10,
            "f11" => Key::F11,
            "f12" => Key::F12,
            other => Key::Unicode(other.chars().next().unwrap_or(' ')),
        }
    }

    impl Desktop for NativeDesktop {
        fn capture_screen(&self) -> Result<Vec<u8>> {
            let monitors = xcap::Monitor::all()
                .map_err(|e| Error::Image(format!("monitor enumeration failed: {}", e)))?;
            let monitor = monitors
                .into_iter()
                .next()
                .ok_or_else(|| Error::Image("no monitor available".to_string()))?;
            let img = monitor
                .capture_image()
                .map_err(|e| Error::Image(format!("screen capture failed: {}", e)))?;
            let mut buf = std::io::Cursor::new(Vec::new());
            img.write_to(&mut buf, image::ImageFormat::Png)
                .map_err(|e| Error::Image(e.to_string()))?;
            Ok(buf.into_inner())
        }

        fn move_mouse(&self, x: i32, y: i32, duration: Duration) -> Result<()> {
            // Smooth movement: step towards the target across the duration.
            let steps = (duration.as_millis() / 20).clamp(1, 50) as i32;
            let (sx, sy) = self
                .with_enigo(|e| e.location())
                .unwrap_or((x, y));
            for i in 1..=steps {
                let ix = sx + (x - sx) * i / steps;
                let iy = sy + (y - sy) * i / steps;
                self.with_enigo(|e| e.move_mouse(ix, iy, Coordinate::Abs))?;
                std::thread::sleep(duration / steps as u32);
            }
            Ok(())
        }

        fn click(&self, b: MouseButton) -> Result<()> {
            self.with_enigo(|e| e.button(button(b), Direction::Click))
        }

        fn double_click(&self, x: i32, y: i32, b: MouseButton) -> Result<()> {
            self.with_enigo(|e| e.move_mouse(x, y, Coordinate::Abs))?;
            self.with_enigo(|e| e.button(button(b), Direction::Click))?;
            std::thread::sleep(Duration::from_millis(50));
            self.with_enigo(|e| e.button(button(b), Direction::Click))
        }

        fn press_key(&self, key: &str) -> Result<()> {
            let k = named_key(key);
            self.with_enigo(|e| e.key(k, Direction::Click))
        }

        fn hotkey(&self, keys: &[String]) -> Result<()> {
            let mapped: Vec<Key> = keys.iter().map(|k| named_key(k)).collect();
            for k in &mapped {
                self.with_enigo(|e| e.key(*k, Direction::Press))?;
            }
            for k in mapped.iter().rev() {
                self.with_enigo(|e| e.key(*k, Direction::Release))?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_screenshot_is_png() {
        let desktop = HeadlessDesktop::new(64, 48);
        let png = desktop.capture_screen().unwrap();
        let img = image::load_from_memory(&png).unwrap();
        assert_eq!((img.width(), img.height()), (64, 48));
    }

    #[test]
    fn test_headless_input_is_accepted() {
        let desktop = HeadlessDesktop::default();
        desktop.move_mouse(10, 20, Duration::from_millis(1)).unwrap();
        desktop.click(MouseButton::Right).unwrap();
        desktop.press_key("escape").unwrap();
        desktop
            .hotkey(&["ctrl".to_string(), "s".to_string()])
            .unwrap();
    }
}
