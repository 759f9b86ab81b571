use std::{
    ffi::{c_char, c_int, CStr, CString},
    ptr::null,
    ptr::null_mut,
};

pub type EpsgCode = u32;

/// Lowest `proj_identify` confidence taken as a match. 70 means the same system under
/// another name, which is how Esri WKT relates to the EPSG registry.
const MIN_IDENTIFY_CONFIDENCE: c_int = 70;

/// Look up the code under `authority` (e.g. "EPSG", "ESRI") of the coordinate system
/// described by `definition`, which may be WKT in any dialect or an "AUTH:CODE" string.
///
/// # Returns
/// The code of the best candidate from the PROJ database, or None when PROJ cannot read
/// the definition or finds no candidate with enough confidence.
pub fn identify_crs(definition: &str, authority: &str) -> Option<EpsgCode> {
    let definition = CString::new(definition).ok()?;
    let authority = CString::new(authority).ok()?;
    let mut code = None;
    unsafe {
        let context = proj_sys::proj_context_create();
        let crs = proj_sys::proj_create(context, definition.as_ptr());
        if !crs.is_null() {
            let mut confidence: *mut c_int = null_mut();
            let candidates = proj_sys::proj_identify(
                context,
                crs,
                authority.as_ptr(),
                null(),
                &mut confidence,
            );
            if !candidates.is_null() && !confidence.is_null() {
                // Candidates come sorted by decreasing confidence.
                let count = proj_sys::proj_list_get_count(candidates);
                for index in 0..count {
                    if *confidence.offset(index as isize) < MIN_IDENTIFY_CONFIDENCE {
                        break;
                    }
                    let candidate = proj_sys::proj_list_get(context, candidates, index);
                    if candidate.is_null() {
                        continue;
                    }
                    code = c_ptr_as_str(proj_sys::proj_get_id_code(candidate, 0))
                        .and_then(|text| text.parse().ok());
                    proj_sys::proj_destroy(candidate);
                    if code.is_some() {
                        break;
                    }
                }
            }
            if !confidence.is_null() {
                proj_sys::proj_int_list_destroy(confidence);
            }
            if !candidates.is_null() {
                proj_sys::proj_list_destroy(candidates);
            }
            proj_sys::proj_destroy(crs);
        }
        proj_sys::proj_context_destroy(context);
    }
    code
}

/// Esri WKT of a coordinate system from the PROJ database, e.g. ("EPSG", 2272).
pub fn esri_wkt_from_database(authority: &str, code: EpsgCode) -> Option<String> {
    let definition = CString::new(format!("{}:{}", authority, code)).ok()?;
    let mut wkt = None;
    unsafe {
        let context = proj_sys::proj_context_create();
        let crs = proj_sys::proj_create(context, definition.as_ptr());
        if !crs.is_null() {
            // The returned string is owned by `crs`, copy it out before destroying it.
            wkt = c_ptr_as_str(proj_sys::proj_as_wkt(
                context,
                crs,
                proj_sys::PJ_WKT_TYPE_PJ_WKT1_ESRI,
                null(),
            ))
            .map(str::to_string);
            proj_sys::proj_destroy(crs);
        }
        proj_sys::proj_context_destroy(context);
    }
    wkt
}

unsafe fn c_ptr_as_str<'a>(c_string: *const c_char) -> Option<&'a str> {
    if c_string.is_null() {
        return None;
    }
    CStr::from_ptr(c_string).to_str().ok()
}

pub fn epsg_code_to_authority_string(code: EpsgCode) -> String {
    format!("EPSG:{}", code)
}
