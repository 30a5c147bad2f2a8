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

use tantivy::schema::Field;

pub const F_ID: &str = "id";
pub const F_FILE_NAME: &str = "file_name";
pub const F_FILE_PATH: &str = "file_path";
pub const F_TEXT: &str = "text";
pub const F_KEYWORDS: &str = "keywords";
pub const F_DOCUMENT_TYPE: &str = "document_type";
pub const F_CSI_DIVISION: &str = "csi_division";
pub const F_PROCESSED_AT: &str = "processed_at";

pub struct DocumentFields {
    pub f_id: Field,
    pub f_file_name: Field,
    pub f_file_path: Field,
    pub f_text: Field,
    pub f_keywords: Field,
    pub f_document_type: Field,
    pub f_csi_division: Field,
    pub f_processed_at: Field,
}
