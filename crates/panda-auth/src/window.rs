//! Popup window geometry for the interactive sign-in.

/// Popup size in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopupGeometry {
    pub width: u32,
    pub height: u32,
}

impl Default for PopupGeometry {
    fn default() -> Self {
        Self {
            width: 576,
            height: 625,
        }
    }
}

/// Builds `window.open` features that center the popup on a screen of the
/// given size. A popup larger than the screen is pinned to the top-left corner.
pub fn popup_center(geometry: PopupGeometry, screen_width: u32, screen_height: u32) -> String {
    let left = screen_width.saturating_sub(geometry.width) / 2;
    let top = screen_height.saturating_sub(geometry.height) / 2;
    format!(
        "toolbar=no, location=no, directories=no, status=no, menubar=no, scrollbars=yes, \
         resizable=no, copyhistory=no, width={}, height={}, top={top}, left={left}",
        geometry.width, geometry.height
    )
}
