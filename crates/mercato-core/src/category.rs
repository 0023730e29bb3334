//! # Category Tree
//!
//! Pure helpers over the category tree: ancestor chains for the promotion
//! engine and the re-parenting cycle guard.
//!
//! The tree itself lives in the database; callers load the relevant
//! categories into a map and the functions here walk it. Every walk carries
//! a visited set so a corrupted parent chain degrades to a truncated result
//! instead of an infinite loop.

use std::collections::{HashMap, HashSet};

use crate::error::{CoreError, CoreResult};
use crate::types::Category;

/// Returns a category and all its ancestors, nearest first.
///
/// An unknown `category_id` yields an empty chain; the caller decides
/// whether that is an error. A cycle in the stored data stops the walk at
/// the first repeated node.
pub fn ancestor_chain(categories: &HashMap<String, Category>, category_id: &str) -> Vec<String> {
    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    let mut cursor = Some(category_id.to_string());

    while let Some(id) = cursor {
        if !visited.insert(id.clone()) {
            break;
        }
        let Some(category) = categories.get(&id) else {
            break;
        };
        chain.push(id);
        cursor = category.parent_id.clone();
    }

    chain
}

/// Checks that moving `category_id` under `new_parent_id` keeps the tree a
/// tree.
///
/// ## Errors
/// - [`CoreError::NotFound`] - the category or the new parent is unknown
/// - [`CoreError::Conflict`] - the new parent is the category itself or one
///   of its descendants
pub fn check_reparent(
    categories: &HashMap<String, Category>,
    category_id: &str,
    new_parent_id: Option<&str>,
) -> CoreResult<()> {
    if !categories.contains_key(category_id) {
        return Err(CoreError::not_found("Category", category_id));
    }
    let Some(parent_id) = new_parent_id else {
        // Moving to the root is always safe.
        return Ok(());
    };
    if !categories.contains_key(parent_id) {
        return Err(CoreError::not_found("Category", parent_id));
    }
    if parent_id == category_id {
        return Err(CoreError::conflict(format!(
            "category {category_id} cannot be its own parent"
        )));
    }

    // Walk up from the proposed parent; reaching the category being moved
    // means the parent sits inside its own subtree.
    if ancestor_chain(categories, parent_id)
        .iter()
        .any(|id| id == category_id)
    {
        return Err(CoreError::conflict(format!(
            "category {parent_id} is a descendant of {category_id}"
        )));
    }

    Ok(())
}
