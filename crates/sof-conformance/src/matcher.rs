//! Type-aware matching of produced rows against fixture expectations.
//!
//! A produced row matches an expected row when every produced element is named
//! in the expected row and every expected field agrees with the produced values.
//! Expected fields the produced row has no element for are not compared.

use sof_types::{Decimal, JsonValue, TypedValue};
use sof_view::FlatRow;
use tracing::warn;

use crate::fixture::ExpectedRow;

/// The expected rows of one test case.
#[derive(Debug, Clone, Copy)]
pub struct ExpectedRows<'a> {
    rows: &'a [ExpectedRow],
}

impl<'a> ExpectedRows<'a> {
    #[must_use]
    pub fn new(rows: &'a [ExpectedRow]) -> Self {
        Self { rows }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// True when any expected row matches. Expected rows are not consumed, so one
    /// expected row may satisfy several produced rows.
    pub fn has_row(&self, row: &FlatRow) -> bool {
        if self.rows.iter().any(|expected| row_matches(expected, row)) {
            return true;
        }
        warn!(row = %row, "row did not match any expected row");
        false
    }
}

#[must_use]
pub fn row_matches(expected: &ExpectedRow, actual: &FlatRow) -> bool {
    if !actual
        .elements()
        .iter()
        .all(|element| expected.contains_key(element.name()))
    {
        return false;
    }
    expected.fields().all(|(name, value)| {
        actual
            .element(name)
            .is_none_or(|element| field_matches(value, element.values()))
    })
}

#[must_use]
pub fn field_matches(expected: &JsonValue, values: &[TypedValue]) -> bool {
    match expected {
        JsonValue::Null => values.is_empty(),
        JsonValue::Array(items) => {
            items.len() == values.len()
                && items
                    .iter()
                    .zip(values)
                    .all(|(item, value)| scalar_matches(item, value))
        }
        scalar => match values {
            [value] => scalar_matches(scalar, value),
            _ => false,
        },
    }
}

/// Equality between one expected JSON scalar and one produced value.
#[must_use]
pub fn scalar_matches(expected: &JsonValue, actual: &TypedValue) -> bool {
    let Some(expected_text) = expected.string_form() else {
        return false;
    };
    match actual {
        TypedValue::String(value) => *value == expected_text,
        TypedValue::Identifier(id) => id.id_part() == expected_text,
        TypedValue::Decimal { value, .. } => {
            expected.is_number()
                && Decimal::parse(&expected_text).is_ok_and(|parsed| parsed == *value)
        }
        TypedValue::Primitive { text, .. } => *text == expected_text,
        TypedValue::Complex { .. } => false,
    }
}
