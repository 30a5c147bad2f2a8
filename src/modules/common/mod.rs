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

use super::error::code::ErrorCode;
use super::error::GroundworkError;
use mail_parser::{Addr as MimeAddr, Address as MimeAddress};
use poem::error::ResponseError;
use poem::Body;
use poem::{http::StatusCode, Error, Response};
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use tracing::error;

use crate::modules::utils::normalize_address;

pub mod auth;

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct Addr {
    pub name: Option<String>,
    pub address: Option<String>,
}

impl<'x> From<&MimeAddr<'x>> for Addr {
    fn from(original: &MimeAddr<'x>) -> Self {
        Addr {
            name: original.name.as_ref().map(|s| s.to_string()),
            address: original.address.as_ref().map(|s| normalize_address(s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AddrVec(pub Vec<Addr>);

impl Deref for AddrVec {
    type Target = Vec<Addr>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AddrVec {
    /// Bare addresses, entries without one dropped.
    pub fn addresses(&self) -> Vec<String> {
        self.0.iter().filter_map(|a| a.address.clone()).collect()
    }
}

impl<'x> From<&MimeAddress<'x>> for AddrVec {
    fn from(original: &MimeAddress<'x>) -> Self {
        let vec = match original {
            MimeAddress::List(addrs) => addrs.iter().map(Addr::from).collect(),
            MimeAddress::Group(groups) => groups
                .iter()
                .flat_map(|group| group.addresses.iter().map(Addr::from))
                .collect(),
        };
        AddrVec(vec)
    }
}

#[inline]
pub fn create_api_error_response(message: &str, code: ErrorCode) -> Error {
    GroundworkError::Generic {
        message: message.into(),
        location: snafu::Location::default(),
        code,
    }
    .into()
}

impl ResponseError for GroundworkError {
    fn status(&self) -> StatusCode {
        self.code().status()
    }

    fn as_response(&self) -> Response
    where
        Self: std::error::Error + Send + Sync + 'static,
    {
        let code = self.code();
        match self {
            GroundworkError::Generic { location, .. }
            | GroundworkError::RateLimited { location, .. } => {
                error!(
                    error_code = code as u32,
                    error_message = %self.message(),
                    error_location = ?location
                );
            }
            GroundworkError::IoError { source, location } => {
                error!(
                    error_code = code as u32,
                    error_message = %source,
                    error_location = ?location
                );
            }
        }
        let body = serde_json::json!({
            "code": code as u32,
            "message": self.message(),
        });
        let mut builder = Response::builder()
            .status(self.status())
            .content_type("application/json");
        if let Some(secs) = self.retry_after() {
            builder = builder.header("Retry-After", secs.to_string());
        }
        builder.body(Body::from_string(body.to_string()))
    }
}
