use eframe::egui::{Button, Color32, Label, RichText, Rounding};


pub fn get_heart_rate_label(heart_rate: Option<u8>) -> Label {
    let text = match heart_rate {
        Some(heart_rate) => format!("HR: {}", heart_rate),
        None => "HR: --".to_string(),
    };
    Label::new(
        RichText::new(text)
            .color(Color32::RED)
            .background_color(Color32::WHITE)
            .size(40.0),
    )
}

pub fn get_info_label(caption: &str, value: &str) -> Label {
    Label::new(
        RichText::new(format!("{caption}: {value}"))
            .color(Color32::LIGHT_GRAY)
            .size(16.0),
    )
}

/// Rounded blue button, the look shared by every device control.
fn device_control(text: RichText) -> Button<'static> {
    Button::new(text.size(20.0))
        .fill(Color32::BLUE)
        .rounding(Rounding::same(8.0))
}

pub fn get_device_button(device_name: &str) -> Button<'static> {
    device_control(RichText::new(device_name).color(Color32::WHITE))
}

pub fn get_disconnect_device_button() -> Button<'static> {
    device_control(
        RichText::new("DC")
            .color(Color32::RED)
            .background_color(Color32::WHITE),
    )
}

pub fn get_active_device_frame(device_name: &str) -> Label {
    Label::new(
        RichText::new(device_name)
            .color(Color32::WHITE)
            .background_color(Color32::RED)
            .size(20.0),
    )
}

pub fn get_scan_button(scanning: bool) -> Button<'static> {
    let text = if scanning { "Stop scan" } else { "Scan" };
    Button::new(RichText::new(text).size(18.0)).rounding(Rounding::same(8.0))
}
