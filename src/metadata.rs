//! Metadata tags attached to a bitmap.
//!
//! FreeImage groups tags by model (comments, EXIF main, GPS, IPTC, XMP, ...)
//! and exposes them through a find-first / find-next / find-close cursor:
//!
//! ```text
//! FindFirstMetadata(model, dib, &tag) ─▶ handle   (null: no tags in model)
//! FindNextMetadata(handle, &tag)      ─▶ TRUE while tags remain
//! FindCloseMetadata(handle)
//! ```
//!
//! [`tags`] runs the cursor once for a model and copies each tag out, so no
//! native tag pointer outlives the call. The close step runs on every exit
//! path through a guard.
//!
//! ## Interpreted values
//!
//! Tag values are taken from `FreeImage_TagToString`, which renders the raw
//! value the way the model defines it (rationals as `1/200`, enumerations by
//! name, ...). The raw type and count are kept alongside.

use crate::bitmap::BitmapOps;
use crate::error::{Error, Result};
use crate::ffi::{self, FALSE, FIMETADATA, FITAG};
use crate::library::Library;
use crate::types::{MetadataModel, TagType};
use std::collections::BTreeMap;
use std::ffi::CString;
use std::ptr;

/// One metadata tag, copied out of the library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub description: Option<String>,
    pub id: u16,
    pub tag_type: Option<TagType>,
    /// Number of values of `tag_type`.
    pub count: u32,
    /// Value rendered by the library.
    pub value: String,
}

/// Interpreted values per model, models without tags left out.
pub type Metadata = BTreeMap<MetadataModel, BTreeMap<String, String>>;

/// Closes a find handle on drop.
struct FindGuard<'a> {
    library: &'a Library,
    handle: *mut FIMETADATA,
}

impl Drop for FindGuard<'_> {
    fn drop(&mut self) {
        if let Ok(close) = self.library.api().find_close_metadata() {
            unsafe { close(self.handle) };
        }
    }
}

fn read_tag(library: &Library, model: MetadataModel, tag: *mut FITAG) -> Result<Tag> {
    let api = library.api();
    let (get_key, get_description, get_id) = (api.get_tag_key()?, api.get_tag_description()?, api.get_tag_id()?);
    let (get_type, get_count, to_string) = (api.get_tag_type()?, api.get_tag_count()?, api.tag_to_string()?);
    unsafe {
        Ok(Tag {
            key: ffi::string_from(get_key(tag)).unwrap_or_default(),
            description: ffi::string_from(get_description(tag)),
            id: get_id(tag),
            tag_type: TagType::from_code(get_type(tag)),
            count: get_count(tag),
            value: ffi::string_from(to_string(model.code(), tag, ptr::null_mut())).unwrap_or_default(),
        })
    }
}

/// Number of tags in `model`.
pub fn count<B: BitmapOps + ?Sized>(bitmap: &B, model: MetadataModel) -> Result<u32> {
    let get_metadata_count = bitmap.library().api().get_metadata_count()?;
    Ok(unsafe { get_metadata_count(model.code(), bitmap.raw()) })
}

/// Tag counts for every model, in model order.
pub fn counts<B: BitmapOps + ?Sized>(bitmap: &B) -> Result<Vec<(MetadataModel, u32)>> {
    MetadataModel::ALL
        .iter()
        .map(|&model| Ok((model, count(bitmap, model)?)))
        .collect()
}

/// All tags in `model`, in the order the library reports them.
pub fn tags<B: BitmapOps + ?Sized>(bitmap: &B, model: MetadataModel) -> Result<Vec<Tag>> {
    let library = bitmap.library();
    let api = library.api();
    let (find_first, find_next) = (api.find_first_metadata()?, api.find_next_metadata()?);
    api.find_close_metadata()?;

    let mut tag: *mut FITAG = ptr::null_mut();
    let handle = unsafe { find_first(model.code(), bitmap.raw(), &mut tag) };
    if handle.is_null() {
        return Ok(Vec::new());
    }
    let _guard = FindGuard { library, handle };

    let mut found = Vec::new();
    while !tag.is_null() {
        found.push(read_tag(library, model, tag)?);
        tag = ptr::null_mut();
        if unsafe { find_next(handle, &mut tag) } == FALSE {
            break;
        }
    }
    Ok(found)
}

/// Look a single tag up by key.
pub fn get<B: BitmapOps + ?Sized>(bitmap: &B, model: MetadataModel, key: &str) -> Result<Option<Tag>> {
    let get_metadata = bitmap.library().api().get_metadata()?;
    let key = CString::new(key).map_err(|_| Error::InvalidArgument(format!("tag key contains a NUL byte: {key:?}")))?;
    let mut tag: *mut FITAG = ptr::null_mut();
    let found = unsafe { get_metadata(model.code(), bitmap.raw(), key.as_ptr(), &mut tag) };
    if found == FALSE || tag.is_null() {
        return Ok(None);
    }
    read_tag(bitmap.library(), model, tag).map(Some)
}

/// Every tag of every model as `key -> value`.
pub fn collect<B: BitmapOps + ?Sized>(bitmap: &B) -> Result<Metadata> {
    let mut metadata = Metadata::new();
    for &model in MetadataModel::ALL {
        let found = tags(bitmap, model)?;
        if found.is_empty() {
            continue;
        }
        metadata.insert(model, found.into_iter().map(|tag| (tag.key, tag.value)).collect());
    }
    Ok(metadata)
}
