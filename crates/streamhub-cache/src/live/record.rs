//! Hash encoding of [`LiveStream`] records.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use streamhub_core::error::{AppError, ErrorKind};
use streamhub_core::result::AppResult;
use streamhub_core::types::{CategoryId, StreamId, UserId};
use streamhub_entity::stream::{LiveStream, StreamCategory, StreamOwner, StreamSource};

pub const ID: &str = "id";
pub const TITLE: &str = "title";
pub const THUMBNAIL: &str = "thumbnail";
pub const VIEWERS: &str = "viewers";
pub const POLLED_VIEWERS: &str = "polled_viewers";
pub const STARTED_AT: &str = "started_at";
pub const OWNER_ID: &str = "owner_id";
pub const USERNAME: &str = "username";
pub const DISPLAY_NAME: &str = "display_name";
pub const AVATAR: &str = "avatar";
pub const CATEGORY_ID: &str = "category_id";
pub const CATEGORY_NAME: &str = "category_name";
pub const CATEGORY_SLUG: &str = "category_slug";
pub const SOURCE: &str = "source";
pub const EXTERNAL_ID: &str = "external_id";

/// Flatten a stream into hash fields. Absent optionals are omitted.
pub fn encode(stream: &LiveStream) -> Vec<(String, String)> {
    let mut fields = vec![
        (ID.to_string(), stream.id.to_string()),
        (TITLE.to_string(), stream.title.clone()),
        (VIEWERS.to_string(), stream.viewers.to_string()),
        (POLLED_VIEWERS.to_string(), stream.polled_viewers.to_string()),
        (STARTED_AT.to_string(), stream.started_at.to_rfc3339()),
        (OWNER_ID.to_string(), stream.owner.id.to_string()),
        (USERNAME.to_string(), stream.owner.username.clone()),
        (DISPLAY_NAME.to_string(), stream.owner.display_name.clone()),
        (SOURCE.to_string(), stream.source.as_str().to_string()),
    ];
    fields.extend(category_fields(&stream.category));
    if let Some(thumbnail) = &stream.thumbnail {
        fields.push((THUMBNAIL.to_string(), thumbnail.clone()));
    }
    if let Some(avatar) = &stream.owner.avatar {
        fields.push((AVATAR.to_string(), avatar.clone()));
    }
    if let Some(external_id) = &stream.external_id {
        fields.push((EXTERNAL_ID.to_string(), external_id.clone()));
    }
    fields
}

/// Hash fields describing a category.
pub fn category_fields(category: &StreamCategory) -> Vec<(String, String)> {
    vec![
        (CATEGORY_ID.to_string(), category.id.to_string()),
        (CATEGORY_NAME.to_string(), category.name.clone()),
        (CATEGORY_SLUG.to_string(), category.slug.clone()),
    ]
}

/// Rebuild a stream from hash fields. An empty hash means no record.
pub fn decode(fields: &HashMap<String, String>) -> AppResult<Option<LiveStream>> {
    if fields.is_empty() {
        return Ok(None);
    }

    let started_at = DateTime::parse_from_rfc3339(required(fields, STARTED_AT)?)
        .map_err(|e| {
            AppError::with_source(ErrorKind::Serialization, "Corrupt stream start time", e)
        })?
        .with_timezone(&Utc);

    Ok(Some(LiveStream {
        id: StreamId(parse(fields, ID)?),
        title: required(fields, TITLE)?.to_string(),
        thumbnail: fields.get(THUMBNAIL).cloned(),
        viewers: parse(fields, VIEWERS)?,
        polled_viewers: fields
            .get(POLLED_VIEWERS)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        started_at,
        owner: StreamOwner {
            id: UserId(parse(fields, OWNER_ID)?),
            username: required(fields, USERNAME)?.to_string(),
            display_name: required(fields, DISPLAY_NAME)?.to_string(),
            avatar: fields.get(AVATAR).cloned(),
        },
        category: StreamCategory {
            id: CategoryId(parse(fields, CATEGORY_ID)?),
            name: required(fields, CATEGORY_NAME)?.to_string(),
            slug: required(fields, CATEGORY_SLUG)?.to_string(),
        },
        source: StreamSource::from_str(required(fields, SOURCE)?)
            .map_err(|e| AppError::new(ErrorKind::Serialization, e))?,
        external_id: fields.get(EXTERNAL_ID).cloned(),
    }))
}

fn required<'a>(fields: &'a HashMap<String, String>, name: &str) -> AppResult<&'a str> {
    fields.get(name).map(String::as_str).ok_or_else(|| {
        AppError::new(
            ErrorKind::Serialization,
            format!("Stream record is missing field '{name}'"),
        )
    })
}

fn parse<T: FromStr>(fields: &HashMap<String, String>, name: &str) -> AppResult<T> {
    required(fields, name)?.parse().map_err(|_| {
        AppError::new(
            ErrorKind::Serialization,
            format!("Stream record field '{name}' is not a number"),
        )
    })
}
