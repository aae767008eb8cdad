#[cfg(target_arch = "wasm32")]
use std::future::Future;


#[macro_export]
macro_rules! log {
    ( $( $t:tt )* ) => {
        $crate::utils::console_log(&format!( $( $t )* ))
    }
}


#[macro_export]
macro_rules! log_error {
    ( $( $t:tt )* ) => {
        $crate::utils::console_error(&format!( $( $t )* ))
    }
}


#[cfg(target_arch = "wasm32")]
#[wasm_bindgen::prelude::wasm_bindgen(module = "/helper.js")]
extern "C" {
    pub fn toggle_fullscreen(element: &web_sys::Element);
}


pub fn console_log(s: &str) {
    #[cfg(target_arch = "wasm32")]
    web_sys::console::log_1(&s.into());
    #[cfg(not(target_arch = "wasm32"))]
    eprintln!("{}", s);
}


pub fn console_error(s: &str) {
    #[cfg(target_arch = "wasm32")]
    web_sys::console::error_1(&s.into());
    #[cfg(not(target_arch = "wasm32"))]
    eprintln!("{}", s);
}


/// Enable better error messages if our code ever panics
pub fn set_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}


/// Executes an async Future on the current thread
#[cfg(target_arch = "wasm32")]
#[inline(always)]
pub fn execute_future<F: Future<Output = ()> + 'static>(f: F) {
    wasm_bindgen_futures::spawn_local(f);
}


/// Check if a float is zero
#[inline(always)]
pub fn is_float_zero(x: f32, threshold: f32) -> bool {
    return x.abs() < threshold;
}


/// Check if two floats are equal
#[inline(always)]
pub fn are_floats_equal(x: f32, y: f32, threshold: f32) -> bool {
    return is_float_zero(x-y, threshold);
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_comparisons() {
        assert!(is_float_zero(1e-7, 1e-6));
        assert!(!is_float_zero(-1e-3, 1e-6));
        assert!(are_floats_equal(0.1 + 0.2, 0.3, 1e-6));
        assert!(!are_floats_equal(1.0, 1.1, 1e-6));
    }

    #[test]
    fn log_macros_work_as_match_arms() {
        let results: [Result<u32, &str>; 2] = [Ok(1), Err("bad")];
        for result in results {
            match result {
                Ok(v) => crate::log!("value {}", v),
                Err(e) => crate::log_error!("error {}", e),
            }
        }
        let unit: () = crate::log!("done");
        assert_eq!(unit, ());
    }
}
