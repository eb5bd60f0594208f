//! Multipart form reading shared by the upload endpoints

use std::collections::HashMap;

use axum::{
    extract::multipart::{Multipart, MultipartError},
    http::StatusCode,
};
use pressroom_common::{
    clipping::UploadedImage,
    errors::{AppError, Result},
};

/// A multipart body split into file parts and text fields.
/// A part counts as a file when it carries a file name.
#[derive(Debug, Default)]
pub struct Form {
    files: Vec<(String, UploadedImage)>,
    fields: HashMap<String, String>,
}

impl Form {
    pub async fn read(mut multipart: Multipart, limit: usize) -> Result<Self> {
        let mut form = Form::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| multipart_error(e, limit))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let data = field.bytes().await.map_err(|e| multipart_error(e, limit))?;

            if file_name.is_some() {
                form.files.push((
                    name,
                    UploadedImage {
                        data: data.to_vec(),
                        file_name,
                        content_type,
                    },
                ));
            } else {
                let text = String::from_utf8(data.to_vec()).map_err(|_| AppError::InvalidFormat {
                    message: format!("field {} is not valid UTF-8", name),
                })?;
                form.fields.insert(name, text);
            }
        }

        Ok(form)
    }

    /// Remove the file part called `name`; file parts under other names are ignored
    pub fn take_file(&mut self, name: &str) -> Option<UploadedImage> {
        let index = self.files.iter().position(|(field, _)| field == name)?;
        Some(self.files.remove(index).1)
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn multipart_error(err: MultipartError, limit: usize) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge { limit }
    } else {
        AppError::Validation {
            message: format!("malformed multipart body: {}", err.body_text()),
            field: None,
        }
    }
}
