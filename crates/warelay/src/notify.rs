//! Pairing notifications: the QR code on the terminal, plus an emailed PNG
//! copy for operators who are not watching the console.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::{GrayImage, Luma};
use qrcode::render::unicode;
use qrcode::{Color, QrCode};
use thiserror::Error;
use tracing::{error, info};

use crate::mail::{Attachment, Mailer, SendOutcome};

/// Rendered QR image edge target, in pixels.
const QR_TARGET_SIZE: u32 = 400;
/// Quiet-zone margin, in modules.
const QR_MARGIN_MODULES: u32 = 2;

const QR_EMAIL_SUBJECT: &str = "WhatsApp Bot - QR Code Authentication Required";
const QR_ATTACHMENT_NAME: &str = "whatsapp-qr-code.png";

const QR_EMAIL_TEXT: &str = "WhatsApp QR Code for authentication has been generated. \
    Please check the attached QR code image and scan it with your WhatsApp mobile app. \
    This QR code will expire shortly.";

const QR_EMAIL_HTML: &str = "<h2>WhatsApp QR Code</h2>\
    <p>Scan the attached QR code with your WhatsApp mobile app to authenticate:</p>\
    <p>This QR code will expire shortly, so scan it as soon as possible.</p>\
    <p>If you can't see the attachment, please check your spam folder or contact support.</p>";

/// Shows pairing codes and, when configured, emails them to the operator.
pub struct PairingNotifier {
    mailer: Option<Mailer>,
    notify_to: Option<String>,
}

impl PairingNotifier {
    pub fn new(mailer: Option<Mailer>, notify_to: Option<String>) -> Self {
        Self { mailer, notify_to }
    }

    /// Never fails: pairing must not be blocked by a notification problem.
    pub async fn notify(&self, code: &str) {
        match render_terminal(code) {
            Ok(art) => println!("{art}"),
            Err(e) => error!(error = %e, "error rendering QR code for terminal"),
        }

        let (Some(mailer), Some(to)) = (&self.mailer, &self.notify_to) else {
            return;
        };

        let png = match render_png(code) {
            Ok(png) => png,
            Err(e) => {
                error!(error = %e, "error rendering QR code image");
                return;
            }
        };

        let attachment = Attachment {
            filename: QR_ATTACHMENT_NAME.to_string(),
            content: BASE64.encode(&png),
            content_type: "image/png".to_string(),
            disposition: "attachment".to_string(),
        };

        match mailer
            .send(
                to,
                QR_EMAIL_SUBJECT,
                QR_EMAIL_TEXT,
                Some(QR_EMAIL_HTML),
                Some(vec![attachment]),
            )
            .await
        {
            SendOutcome::Sent { message_id } => {
                info!(%message_id, to, "QR code sent via email");
            }
            SendOutcome::Failed { error } => {
                error!(error, to, "failed to send QR code email");
            }
        }
    }
}

#[derive(Debug, Error)]
enum QrRenderError {
    #[error("QR encoding failed: {0}")]
    Encode(#[from] qrcode::types::QrError),

    #[error("PNG encoding failed: {0}")]
    Image(#[from] image::ImageError),
}

fn render_terminal(code: &str) -> Result<String, QrRenderError> {
    let qr = QrCode::new(code)?;
    Ok(qr.render::<unicode::Dense1x2>().quiet_zone(true).build())
}

/// Black-on-white PNG with a quiet zone, scaled to roughly
/// [`QR_TARGET_SIZE`] pixels per edge.
fn render_png(code: &str) -> Result<Vec<u8>, QrRenderError> {
    let qr = QrCode::new(code)?;
    let width = qr.width() as u32;
    let modules = qr.to_colors();

    let framed = width + 2 * QR_MARGIN_MODULES;
    let scale = (QR_TARGET_SIZE / framed).max(1);
    let edge = framed * scale;

    let img = GrayImage::from_fn(edge, edge, |x, y| {
        let mx = x / scale;
        let my = y / scale;
        if mx < QR_MARGIN_MODULES
            || my < QR_MARGIN_MODULES
            || mx >= width + QR_MARGIN_MODULES
            || my >= width + QR_MARGIN_MODULES
        {
            return Luma([0xFF]);
        }
        let (mx, my) = (mx - QR_MARGIN_MODULES, my - QR_MARGIN_MODULES);
        match modules[(my * width + mx) as usize] {
            Color::Dark => Luma([0x00]),
            Color::Light => Luma([0xFF]),
        }
    });

    let mut png = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)?;
    Ok(png)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 4] = [0x89, b'P', b'N', b'G'];

    #[test]
    fn terminal_render_produces_block_art() {
        let art = render_terminal("2@pairing-code-payload").unwrap();
        assert!(!art.is_empty());
        assert!(art.lines().count() > 10);
    }

    #[test]
    fn png_render_produces_a_png() {
        let png = render_png("2@pairing-code-payload").unwrap();
        assert_eq!(&png[..4], &PNG_MAGIC);
        // Scaled up to roughly the target edge, never below one pixel per
        // module.
        assert!(png.len() > 100);
    }

    #[tokio::test]
    async fn notify_without_mailer_is_a_no_op() {
        let notifier = PairingNotifier::new(None, None);
        notifier.notify("2@pairing-code-payload").await;
    }
}
