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

use std::sync::{Arc, LazyLock};

use crate::modules::indexer::fields::*;
use tantivy::schema::{Field, Schema, FAST, INDEXED, STORED, STRING, TEXT};

static DOCUMENT_FIELDS: LazyLock<Arc<DocumentFields>> = LazyLock::new(|| {
    let (_, fields) = SchemaTools::create_document_schema();
    Arc::new(fields)
});

pub struct SchemaTools;

impl SchemaTools {
    pub fn document_schema() -> Schema {
        let (schema, _) = Self::create_document_schema();
        schema
    }

    pub fn document_fields() -> &'static DocumentFields {
        &DOCUMENT_FIELDS
    }

    pub fn document_default_fields() -> Vec<Field> {
        let fields = Self::document_fields();
        vec![fields.f_file_name, fields.f_text, fields.f_keywords]
    }

    pub fn create_document_schema() -> (Schema, DocumentFields) {
        let mut builder = Schema::builder();
        let f_id = builder.add_u64_field(F_ID, INDEXED | STORED | FAST);
        // Name and body: tokenized for full-text search
        let f_file_name = builder.add_text_field(F_FILE_NAME, TEXT | STORED);
        let f_file_path = builder.add_text_field(F_FILE_PATH, STRING | STORED);
        let f_text = builder.add_text_field(F_TEXT, TEXT | STORED);
        let f_keywords = builder.add_text_field(F_KEYWORDS, TEXT | STORED);
        // Classification: exact match filters
        let f_document_type = builder.add_text_field(F_DOCUMENT_TYPE, STRING | STORED | FAST);
        let f_csi_division = builder.add_text_field(F_CSI_DIVISION, STRING | STORED | FAST);
        let f_processed_at = builder.add_i64_field(F_PROCESSED_AT, STORED | FAST);
        let fields = DocumentFields {
            f_id,
            f_file_name,
            f_file_path,
            f_text,
            f_keywords,
            f_document_type,
            f_csi_division,
            f_processed_at,
        };
        (builder.build(), fields)
    }
}
