//! Multipart form decoding for thread and post submissions.

use std::collections::HashMap;

use actix_multipart::Multipart;
use bytes::{Bytes, BytesMut};
use futures_util::TryStreamExt;
use rb_core::error::AppError;

use crate::error::ApiError;

/// Form field carrying the attachment.
pub const IMAGE_FIELD: &str = "image";

/// Largest accepted form, all fields and the attachment together.
pub const MAX_FORM_BYTES: usize = 10 << 20;

#[derive(Debug)]
pub struct Upload {
    pub filename: String,
    pub data: Bytes,
}

#[derive(Debug, Default)]
pub struct PostForm {
    fields: HashMap<String, String>,
    pub image: Option<Upload>,
}

impl PostForm {
    pub async fn read(mut payload: Multipart) -> Result<Self, ApiError> {
        let mut form = PostForm::default();
        let mut total = 0;

        while let Some(mut field) = payload.try_next().await? {
            let disposition = field.content_disposition().clone();
            let name = disposition.get_name().unwrap_or_default().to_string();

            let mut data = BytesMut::new();
            while let Some(chunk) = field.try_next().await? {
                total += chunk.len();
                if total > MAX_FORM_BYTES {
                    return Err(AppError::validation(format!(
                        "form exceeds {MAX_FORM_BYTES} bytes"
                    ))
                    .into());
                }
                data.extend_from_slice(&chunk);
            }

            match disposition.get_filename() {
                Some(filename) if name == IMAGE_FIELD => {
                    // Browsers send an empty file part when nothing was picked.
                    if !filename.is_empty() || !data.is_empty() {
                        form.image = Some(Upload {
                            filename: filename.to_string(),
                            data: data.freeze(),
                        });
                    }
                }
                _ => {
                    let text = String::from_utf8(data.to_vec()).map_err(|_| {
                        AppError::validation(format!("field '{name}' is not valid UTF-8"))
                    })?;
                    form.fields.insert(name, text);
                }
            }
        }

        Ok(form)
    }

    /// Text value of `name`, empty when the field was not sent.
    pub fn field(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or("")
    }
}
