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

use poem_openapi::{
    types::{ParseFromJSON, ToJSON},
    Object,
};
use serde::{Deserialize, Serialize};

use crate::modules::database::Paginated;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::GroundworkResult;
use crate::raise_error;

#[derive(Clone, Debug, Default, Deserialize, Serialize, Object)]
pub struct DataPage<S: ParseFromJSON + ToJSON> {
    pub current_page: Option<u64>,
    pub page_size: Option<u64>,
    pub total_items: u64,
    pub items: Vec<S>,
    pub total_pages: Option<u64>,
}

impl<S: ParseFromJSON + ToJSON> From<Paginated<S>> for DataPage<S> {
    fn from(paginated: Paginated<S>) -> Self {
        DataPage {
            current_page: paginated.page,
            page_size: paginated.page_size,
            total_items: paginated.total_items,
            items: paginated.items,
            total_pages: paginated.total_pages,
        }
    }
}

/// Pages an already materialized list. Without `page`/`page_size` the whole
/// list comes back as a single page.
pub fn paginate_vec<T>(
    items: Vec<T>,
    page: Option<u64>,
    page_size: Option<u64>,
) -> GroundworkResult<Paginated<T>> {
    let total_items = items.len() as u64;
    match (page, page_size) {
        (Some(p), Some(s)) => {
            if p == 0 || s == 0 {
                return Err(raise_error!(
                    "'page' and 'page_size' must be greater than 0.".into(),
                    ErrorCode::InvalidParameter
                ));
            }
            let total_pages = total_items.div_ceil(s);
            let offset = ((p - 1) * s) as usize;
            let items = items.into_iter().skip(offset).take(s as usize).collect();
            Ok(Paginated::new(
                page,
                page_size,
                total_items,
                Some(total_pages),
                items,
            ))
        }
        _ => Ok(Paginated::new(None, None, total_items, None, items)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_a_vec() {
        let page = paginate_vec((1..=7).collect::<Vec<u32>>(), Some(2), Some(3)).unwrap();
        assert_eq!(page.items, vec![4, 5, 6]);
        assert_eq!(page.total_pages, Some(3));
        let last = paginate_vec((1..=7).collect::<Vec<u32>>(), Some(3), Some(3)).unwrap();
        assert_eq!(last.items, vec![7]);
        assert!(paginate_vec(vec![1], Some(0), Some(3)).is_err());
    }
}
