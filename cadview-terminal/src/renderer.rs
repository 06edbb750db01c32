/// Paints session frames onto a crossterm terminal
use cadview_core::Color;
use cadview_session::Frame;
use crossterm::{
    cursor,
    style::{self, Print, ResetColor, SetBackgroundColor, SetForegroundColor},
    QueueableCommand,
};
use std::io::Write;

pub fn terminal_color(color: Color) -> style::Color {
    let [r, g, b] = color.to_rgb8();
    style::Color::Rgb { r, g, b }
}

/// Queues a frame starting at row `top`. Color commands are emitted only
/// where the color changes along a row.
pub fn draw<W: Write>(frame: &Frame, top: u16, writer: &mut W) -> std::io::Result<()> {
    let image = &frame.image;
    writer.queue(SetBackgroundColor(terminal_color(image.background)))?;

    for (y, row) in image.rows().enumerate() {
        writer.queue(cursor::MoveTo(0, top + y as u16))?;
        let mut current = None;
        for cell in row {
            if current != Some(cell.color) {
                writer.queue(SetForegroundColor(terminal_color(cell.color)))?;
                current = Some(cell.color);
            }
            writer.queue(Print(cell.glyph))?;
        }
    }
    writer.queue(ResetColor)?;
    Ok(())
}
