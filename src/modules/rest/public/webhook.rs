//
// Copyright (c) 2025 rustmailer.com (https://rustmailer.com)
//
// This file is part of the Groundwork Mail Sync Project
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
use std::collections::HashMap;

use poem::web::{Form, Json, Multipart};
use poem::{handler, Body, FromRequest, Request, RequestBody};
use serde_json::Value;
use tracing::info;

use crate::modules::error::code::ErrorCode;
use crate::modules::error::GroundworkResult;
use crate::modules::sync::engine::SYNC_ENGINE;
use crate::modules::webhook::{receive, InboundAttachment, InboundEmail, InboundForm, WebhookReceipt};
use crate::raise_error;

enum PayloadKind {
    Json,
    Multipart,
    UrlEncoded,
    Mime,
}

fn payload_kind(content_type: Option<&str>) -> PayloadKind {
    let content_type = content_type.unwrap_or_default().to_ascii_lowercase();
    if content_type.starts_with("multipart/") {
        PayloadKind::Multipart
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        PayloadKind::UrlEncoded
    } else if content_type.starts_with("message/rfc822") || content_type.starts_with("text/plain") {
        PayloadKind::Mime
    } else {
        PayloadKind::Json
    }
}

async fn read_form(req: &Request, body: Body) -> poem::Result<InboundForm> {
    let mut multipart = Multipart::from_request(req, &mut RequestBody::new(body)).await?;
    let mut form = InboundForm::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string).unwrap_or_default();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let content = field.bytes().await.map_err(|e| {
            raise_error!(
                format!("Failed to read form field '{}': {}", name, e),
                ErrorCode::InvalidParameter
            )
        })?;
        match file_name {
            Some(filename) if !filename.is_empty() => form.files.push(InboundAttachment {
                filename,
                content_type,
                content: content.into(),
            }),
            _ => {
                form.fields
                    .insert(name, String::from_utf8_lossy(&content).into_owned());
            }
        }
    }
    Ok(form)
}

fn parse_json(bytes: &[u8]) -> GroundworkResult<InboundEmail> {
    let payload: Value = serde_json::from_slice(bytes).map_err(|e| {
        raise_error!(
            format!("Invalid webhook JSON: {}", e),
            ErrorCode::InvalidParameter
        )
    })?;
    InboundEmail::from_json(&payload)
}

/// Inbound email forwarded by a mail service, as JSON, multipart form or raw MIME.
#[handler]
pub async fn inbound_email(req: &Request, body: Body) -> poem::Result<Json<WebhookReceipt>> {
    let email = match payload_kind(req.content_type()) {
        PayloadKind::Multipart => InboundEmail::from_form(read_form(req, body).await?)?,
        PayloadKind::UrlEncoded => {
            let fields =
                Form::<HashMap<String, String>>::from_request(req, &mut RequestBody::new(body))
                    .await?;
            InboundEmail::from_form(InboundForm {
                fields: fields.0,
                files: Vec::new(),
            })?
        }
        kind => {
            let bytes = body.into_bytes().await?;
            match kind {
                PayloadKind::Mime => InboundEmail::from_mime(&bytes)?,
                _ => parse_json(&bytes)?,
            }
        }
    };
    let receipt = receive(&SYNC_ENGINE, email).await?;
    info!(
        status = ?receipt.status,
        account_id = ?receipt.account_id,
        "Inbound email handled"
    );
    Ok(Json(receipt))
}
