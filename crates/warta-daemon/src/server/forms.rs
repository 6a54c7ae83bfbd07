use std::collections::BTreeMap;

use serde::Serialize;
use utoipa::ToSchema;
use warta_db::{ImageKind, MediaStore, PostRecord};

/// Minimum title length in characters.
pub(super) const TITLE_MIN_CHARS: usize = 5;
/// Minimum content length in characters.
pub(super) const CONTENT_MIN_CHARS: usize = 10;
/// Largest accepted image upload in kilobytes.
pub(super) const IMAGE_MAX_KILOBYTES: usize = 2048;

/// Upload types listed in the form descriptors.
pub(super) const ACCEPTED_IMAGE_TYPES: [&str; 5] = ["jpeg", "png", "jpg", "gif", "svg"];

/// Raw multipart fields for the create and update forms. Empty file parts are
/// treated as absent so browser forms without a new image round-trip cleanly.
#[derive(Debug, Default)]
pub(super) struct PostForm {
    pub title: Option<String>,
    pub content: Option<String>,
    pub image: Option<Vec<u8>>,
}

/// Image payload that passed validation.
#[derive(Debug)]
pub(super) struct ImageUpload {
    pub bytes: Vec<u8>,
    pub kind: ImageKind,
}

/// Validated payload for the store operation.
#[derive(Debug)]
pub(super) struct StorePostRequest {
    pub title: String,
    pub content: String,
    pub image: ImageUpload,
}

/// Validated payload for the update operation; the image is optional and
/// `None` keeps the stored one.
#[derive(Debug)]
pub(super) struct UpdatePostRequest {
    pub title: String,
    pub content: String,
    pub image: Option<ImageUpload>,
}

/// Field-level validation failures keyed by form field name. All rules run
/// before a form is rejected, so every failing field reports its messages.
#[derive(Debug, Default)]
pub(super) struct ValidationErrors {
    fields: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    fn push(&mut self, field: &str, message: impl Into<String>) {
        self.fields
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_fields(self) -> BTreeMap<String, Vec<String>> {
        self.fields
    }
}

pub(super) fn validate_store(form: PostForm) -> Result<StorePostRequest, ValidationErrors> {
    let mut valid = validate(form, true)?;
    match valid.image.take() {
        Some(image) => Ok(StorePostRequest {
            title: valid.title,
            content: valid.content,
            image,
        }),
        None => {
            let mut errors = ValidationErrors::default();
            errors.push("image", "image is required");
            Err(errors)
        }
    }
}

pub(super) fn validate_update(form: PostForm) -> Result<UpdatePostRequest, ValidationErrors> {
    let valid = validate(form, false)?;
    Ok(UpdatePostRequest {
        title: valid.title,
        content: valid.content,
        image: valid.image,
    })
}

#[derive(Debug)]
struct ValidatedForm {
    title: String,
    content: String,
    image: Option<ImageUpload>,
}

fn validate(form: PostForm, image_required: bool) -> Result<ValidatedForm, ValidationErrors> {
    let mut errors = ValidationErrors::default();

    let title = form.title.unwrap_or_default();
    if title.trim().is_empty() {
        errors.push("title", "title is required");
    } else if title.chars().count() < TITLE_MIN_CHARS {
        errors.push(
            "title",
            format!("title must be at least {TITLE_MIN_CHARS} characters"),
        );
    }

    let content = form.content.unwrap_or_default();
    if content.trim().is_empty() {
        errors.push("content", "content is required");
    } else if content.chars().count() < CONTENT_MIN_CHARS {
        errors.push(
            "content",
            format!("content must be at least {CONTENT_MIN_CHARS} characters"),
        );
    }

    let image = match form.image {
        Some(bytes) => check_image(bytes, &mut errors),
        None => {
            if image_required {
                errors.push("image", "image is required");
            }
            None
        }
    };

    if errors.is_empty() {
        Ok(ValidatedForm {
            title,
            content,
            image,
        })
    } else {
        Err(errors)
    }
}

fn check_image(bytes: Vec<u8>, errors: &mut ValidationErrors) -> Option<ImageUpload> {
    let mut ok = true;

    if bytes.len() > IMAGE_MAX_KILOBYTES * 1024 {
        errors.push(
            "image",
            format!("image must not exceed {IMAGE_MAX_KILOBYTES} kilobytes"),
        );
        ok = false;
    }

    let kind = detect_image_kind(&bytes);
    if kind.is_none() {
        errors.push("image", "image must be a jpeg, png, jpg, gif or svg file");
        ok = false;
    }

    match (ok, kind) {
        (true, Some(kind)) => Some(ImageUpload { bytes, kind }),
        _ => None,
    }
}

/// Detects the upload format from content. The multipart-declared content
/// type is never trusted; rasters are sniffed by magic bytes and SVG by its
/// markup prefix.
pub(super) fn detect_image_kind(bytes: &[u8]) -> Option<ImageKind> {
    if let Ok(format) = image::guess_format(bytes) {
        return match format {
            image::ImageFormat::Jpeg => Some(ImageKind::Jpeg),
            image::ImageFormat::Png => Some(ImageKind::Png),
            image::ImageFormat::Gif => Some(ImageKind::Gif),
            _ => None,
        };
    }

    if looks_like_svg(bytes) {
        return Some(ImageKind::Svg);
    }

    None
}

fn looks_like_svg(bytes: &[u8]) -> bool {
    let text = match std::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(_) => return false,
    };
    let head = text.trim_start();
    head.starts_with("<svg") || (head.starts_with("<?xml") && text.contains("<svg"))
}

/// Describes the fields a client must render for the create and edit forms.
#[derive(Debug, Serialize, ToSchema)]
pub(super) struct FormDescriptor {
    pub action: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_image: Option<String>,
    pub fields: Vec<FormField>,
}

#[derive(Debug, Serialize, ToSchema)]
pub(super) struct FormField {
    pub name: String,
    pub kind: FormFieldKind,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_chars: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_kilobytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accept: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub(super) enum FormFieldKind {
    Text,
    Textarea,
    File,
}

pub(super) fn create_form_descriptor() -> FormDescriptor {
    FormDescriptor {
        action: "/posts".to_string(),
        method: "POST".to_string(),
        current_image: None,
        fields: form_fields(None, None, true),
    }
}

pub(super) fn edit_form_descriptor(post: &PostRecord) -> FormDescriptor {
    FormDescriptor {
        action: format!("/posts/{}", post.id),
        method: "PUT".to_string(),
        current_image: Some(MediaStore::url_path(&post.image)),
        fields: form_fields(Some(post.title.clone()), Some(post.content.clone()), false),
    }
}

fn form_fields(
    title: Option<String>,
    content: Option<String>,
    image_required: bool,
) -> Vec<FormField> {
    vec![
        FormField {
            name: "title".to_string(),
            kind: FormFieldKind::Text,
            required: true,
            min_chars: Some(TITLE_MIN_CHARS),
            max_kilobytes: None,
            accept: None,
            value: title,
        },
        FormField {
            name: "content".to_string(),
            kind: FormFieldKind::Textarea,
            required: true,
            min_chars: Some(CONTENT_MIN_CHARS),
            max_kilobytes: None,
            accept: None,
            value: content,
        },
        FormField {
            name: "image".to_string(),
            kind: FormFieldKind::File,
            required: image_required,
            min_chars: None,
            max_kilobytes: Some(IMAGE_MAX_KILOBYTES),
            accept: Some(
                ACCEPTED_IMAGE_TYPES
                    .iter()
                    .map(|kind| kind.to_string())
                    .collect(),
            ),
            value: None,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

    fn png_upload() -> Vec<u8> {
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.extend_from_slice(b"not a real frame");
        bytes
    }

    fn filled_form() -> PostForm {
        PostForm {
            title: Some("A valid title".to_string()),
            content: Some("Content long enough to pass".to_string()),
            image: Some(png_upload()),
        }
    }

    #[test]
    fn store_accepts_a_filled_form() {
        let valid = validate_store(filled_form()).unwrap();
        assert_eq!(valid.title, "A valid title");
        assert_eq!(valid.image.kind, ImageKind::Png);
    }

    #[test]
    fn store_collects_every_failure() {
        let errors = validate_store(PostForm::default()).unwrap_err();
        let fields = errors.into_fields();

        assert_eq!(fields["title"], vec!["title is required"]);
        assert_eq!(fields["content"], vec!["content is required"]);
        assert_eq!(fields["image"], vec!["image is required"]);
    }

    #[test]
    fn short_title_is_rejected() {
        let mut form = filled_form();
        form.title = Some("Abcd".to_string());

        let fields = validate_store(form).unwrap_err().into_fields();
        assert_eq!(fields["title"], vec!["title must be at least 5 characters"]);
        assert!(!fields.contains_key("content"));
    }

    #[test]
    fn boundary_lengths_pass() {
        let mut form = filled_form();
        form.title = Some("12345".to_string());
        form.content = Some("1234567890".to_string());

        assert!(validate_store(form).is_ok());
    }

    #[test]
    fn short_content_is_rejected() {
        let mut form = filled_form();
        form.content = Some("too short".to_string());

        let fields = validate_store(form).unwrap_err().into_fields();
        assert_eq!(
            fields["content"],
            vec!["content must be at least 10 characters"]
        );
    }

    #[test]
    fn oversized_image_is_rejected() {
        let mut bytes = png_upload();
        bytes.resize(IMAGE_MAX_KILOBYTES * 1024 + 1, 0);

        let mut form = filled_form();
        form.image = Some(bytes);

        let fields = validate_store(form).unwrap_err().into_fields();
        assert_eq!(
            fields["image"],
            vec!["image must not exceed 2048 kilobytes"]
        );
    }

    #[test]
    fn image_at_the_size_limit_passes() {
        let mut bytes = png_upload();
        bytes.resize(IMAGE_MAX_KILOBYTES * 1024, 0);

        let mut form = filled_form();
        form.image = Some(bytes);

        assert!(validate_store(form).is_ok());
    }

    #[test]
    fn unrecognized_bytes_are_rejected() {
        let mut form = filled_form();
        form.image = Some(b"plain text, not an image".to_vec());

        let fields = validate_store(form).unwrap_err().into_fields();
        assert_eq!(
            fields["image"],
            vec!["image must be a jpeg, png, jpg, gif or svg file"]
        );
    }

    #[test]
    fn update_allows_a_missing_image() {
        let mut form = filled_form();
        form.image = None;

        let valid = validate_update(form).unwrap();
        assert!(valid.image.is_none());
    }

    #[test]
    fn update_still_checks_a_provided_image() {
        let mut form = filled_form();
        form.image = Some(b"garbage".to_vec());

        let fields = validate_update(form).unwrap_err().into_fields();
        assert!(fields.contains_key("image"));
    }

    #[test]
    fn detects_raster_formats_by_magic_bytes() {
        assert_eq!(detect_image_kind(&png_upload()), Some(ImageKind::Png));
        assert_eq!(
            detect_image_kind(b"\xFF\xD8\xFF\xE0rest of a jpeg"),
            Some(ImageKind::Jpeg)
        );
        assert_eq!(
            detect_image_kind(b"GIF89a trailing data"),
            Some(ImageKind::Gif)
        );
    }

    #[test]
    fn detects_svg_markup() {
        assert_eq!(
            detect_image_kind(b"<svg xmlns=\"http://www.w3.org/2000/svg\"></svg>"),
            Some(ImageKind::Svg)
        );
        assert_eq!(
            detect_image_kind(b"<?xml version=\"1.0\"?><svg></svg>"),
            Some(ImageKind::Svg)
        );
        assert_eq!(detect_image_kind(b"<html></html>"), None);
    }

    #[test]
    fn edit_descriptor_prefills_current_values() {
        use chrono::Utc;
        use uuid::Uuid;

        let record = PostRecord {
            id: Uuid::new_v4(),
            title: "Existing".to_string(),
            content: "Existing content".to_string(),
            image: "abc.png".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let descriptor = edit_form_descriptor(&record);
        assert_eq!(descriptor.action, format!("/posts/{}", record.id));
        assert_eq!(descriptor.method, "PUT");
        assert_eq!(
            descriptor.current_image.as_deref(),
            Some("/storage/posts/abc.png")
        );
        assert_eq!(descriptor.fields[0].value.as_deref(), Some("Existing"));
        assert!(!descriptor.fields[2].required);
    }

    #[test]
    fn create_descriptor_requires_the_image() {
        let descriptor = create_form_descriptor();
        assert_eq!(descriptor.action, "/posts");
        assert!(descriptor.current_image.is_none());
        assert!(descriptor.fields[2].required);
    }
}
