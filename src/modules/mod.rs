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
pub mod account;
pub mod common;
pub mod database;
pub mod error;
pub mod indexer;
pub mod ingest;
pub mod logger;
pub mod message;
pub mod oauth2;
pub mod oracle;
pub mod provider;
pub mod rest;
pub mod settings;
pub mod sync;
pub mod utils;
pub mod webhook;
