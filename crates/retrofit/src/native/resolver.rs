//! Runtime resolution of native functions via dlopen.
//!
//! The shim never links against the CUDA runtime or libtorch at build time.
//! Instead each call site names an ordered list of candidate libraries and
//! symbol names, and the first library that opens and exports one of the
//! symbols wins.

use std::ffi::c_void;
use std::fmt;
use std::mem;

use libloading::Library;
use thiserror::Error;
use tracing::{debug, info};

/// Opens shared libraries by path or bare name.
pub trait LibraryLoader {
    fn open(&self, name: &str) -> Result<Box<dyn LoadedLibrary>, String>;
}

/// An open shared library.
pub trait LoadedLibrary {
    /// Address of the exported symbol `name`.
    fn symbol(&self, name: &str) -> Result<*mut c_void, String>;
}

/// The process's dynamic loader, through `libloading`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicLoader;

struct DynamicLibrary(Library);

impl LibraryLoader for DynamicLoader {
    fn open(&self, name: &str) -> Result<Box<dyn LoadedLibrary>, String> {
        // Safety: loading runs the library's initializers; the candidates are
        // the CUDA runtime and libtorch, whose initializers have no
        // preconditions.
        let library = unsafe { Library::new(name) }.map_err(|e| e.to_string())?;
        Ok(Box::new(DynamicLibrary(library)))
    }
}

impl LoadedLibrary for DynamicLibrary {
    fn symbol(&self, name: &str) -> Result<*mut c_void, String> {
        // Safety: the symbol is read as an untyped address; callers give it a
        // type only through `NativeResolver::resolve`.
        let symbol = unsafe { self.0.get::<*mut c_void>(name.as_bytes()) }
            .map_err(|e| e.to_string())?;
        let address = *symbol;
        if address.is_null() {
            return Err(format!("{name} resolved to a null address"));
        }
        Ok(address)
    }
}

/// Nothing among the candidates provided the function.
#[derive(Debug, Clone, Error)]
#[error("none of [{}] exported any of [{}]", .libraries.join(", "), .symbols.join(", "))]
pub struct ResolveError {
    pub libraries: Vec<String>,
    pub symbols: Vec<String>,
    /// One line per failed library open or symbol lookup, in attempt order.
    pub attempts: Vec<String>,
}

/// A bound native function, keeping its library loaded.
pub struct NativeFunction<F> {
    function: F,
    library_name: String,
    symbol: String,
    library: Box<dyn LoadedLibrary>,
}

impl<F: Copy> NativeFunction<F> {
    /// The typed function pointer.
    pub fn get(&self) -> F {
        self.function
    }

    /// Library candidate the function was bound from.
    pub fn library_name(&self) -> &str {
        &self.library_name
    }

    /// Symbol name the function was bound under.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Look up another function exported by the same library.
    ///
    /// # Safety
    ///
    /// `G` must be the exact `extern "C"` function pointer type of `name`.
    pub unsafe fn sibling<G: Copy>(&self, name: &str) -> Option<G> {
        let address = self.library.symbol(name).ok()?;
        // Safety: forwarded to the caller.
        Some(unsafe { cast_address(address) })
    }
}

impl<F> fmt::Debug for NativeFunction<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("library", &self.library_name)
            .field("symbol", &self.symbol)
            .finish()
    }
}

/// Binds native functions from candidate lists.
pub struct NativeResolver {
    loader: Box<dyn LibraryLoader>,
}

impl Default for NativeResolver {
    fn default() -> Self {
        Self::new(DynamicLoader)
    }
}

impl NativeResolver {
    pub fn new(loader: impl LibraryLoader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
        }
    }

    /// Bind the first resolvable symbol from the first library that loads.
    ///
    /// Libraries are tried strictly in order. Once one opens, every symbol
    /// name is tried against it before moving on to the next library.
    ///
    /// # Safety
    ///
    /// `F` must be the exact `extern "C"` function pointer type of every
    /// name in `symbols`.
    pub unsafe fn resolve<F: Copy>(
        &self,
        libraries: &[String],
        symbols: &[String],
    ) -> Result<NativeFunction<F>, ResolveError> {
        let mut attempts = Vec::new();

        for library_name in libraries {
            let library = match self.loader.open(library_name) {
                Ok(library) => library,
                Err(err) => {
                    debug!("failed to load {}: {}", library_name, err);
                    attempts.push(format!("{library_name}: {err}"));
                    continue;
                }
            };

            for symbol in symbols {
                match library.symbol(symbol) {
                    Ok(address) => {
                        info!("bound {} from {}", symbol, library_name);
                        return Ok(NativeFunction {
                            // Safety: forwarded to the caller.
                            function: unsafe { cast_address(address) },
                            library_name: library_name.clone(),
                            symbol: symbol.clone(),
                            library,
                        });
                    }
                    Err(err) => {
                        debug!("{} has no {}: {}", library_name, symbol, err);
                        attempts.push(format!("{library_name}: {symbol}: {err}"));
                    }
                }
            }
        }

        Err(ResolveError {
            libraries: libraries.to_vec(),
            symbols: symbols.to_vec(),
            attempts,
        })
    }
}

/// # Safety
///
/// `F` must be a function pointer type matching the code at `address`.
unsafe fn cast_address<F: Copy>(address: *mut c_void) -> F {
    assert_eq!(
        mem::size_of::<F>(),
        mem::size_of::<*mut c_void>(),
        "native functions are bound as pointer-sized function pointers"
    );
    // Safety: sizes match; the signature is guaranteed by the caller.
    unsafe { mem::transmute_copy::<*mut c_void, F>(&address) }
}


#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::ffi::{c_int, c_void};

    use super::fake::FakeLoader;
    use super::*;

    type Probe = unsafe extern "C" fn(c_int) -> c_int;

    thread_local! {
        static LAST_CALL: Cell<(c_int, c_int)> = const { Cell::new((0, 0)) };
    }

    extern "C" fn first_symbol(arg: c_int) -> c_int {
        LAST_CALL.with(|c| c.set((1, arg)));
        0
    }

    extern "C" fn second_symbol(arg: c_int) -> c_int {
        LAST_CALL.with(|c| c.set((2, arg)));
        0
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_third_library_second_symbol() {
        let loader = FakeLoader::new()
            .library("libthird.so", &[("probe_v2", second_symbol as *const c_void)]);
        let opened = loader.clone();
        let resolver = NativeResolver::new(loader);

        let function = unsafe {
            resolver.resolve::<Probe>(
                &names(&["libfirst.so", "libsecond.so", "libthird.so"]),
                &names(&["probe_v1", "probe_v2"]),
            )
        }
        .unwrap();

        assert_eq!(function.library_name(), "libthird.so");
        assert_eq!(function.symbol(), "probe_v2");
        assert_eq!(opened.opened(), names(&["libfirst.so", "libsecond.so", "libthird.so"]));

        let result = unsafe { (function.get())(7) };
        assert_eq!(result, 0);
        assert_eq!(LAST_CALL.with(Cell::get), (2, 7));
    }

    #[test]
    fn test_symbols_tried_in_loaded_library_before_next() {
        let loader = FakeLoader::new()
            .library("liba.so", &[("other", first_symbol as *const c_void)])
            .library(
                "libb.so",
                &[
                    ("probe_v1", first_symbol as *const c_void),
                    ("probe_v2", second_symbol as *const c_void),
                ],
            );
        let opened = loader.clone();
        let resolver = NativeResolver::new(loader);

        let function = unsafe {
            resolver.resolve::<Probe>(
                &names(&["liba.so", "libb.so", "libc.so"]),
                &names(&["probe_v1", "probe_v2"]),
            )
        }
        .unwrap();

        assert_eq!(function.library_name(), "libb.so");
        assert_eq!(function.symbol(), "probe_v1");
        assert_eq!(opened.opened(), names(&["liba.so", "libb.so"]));

        unsafe { (function.get())(3) };
        assert_eq!(LAST_CALL.with(Cell::get), (1, 3));
    }

    #[test]
    fn test_total_failure_lists_attempts() {
        let loader = FakeLoader::new().library("liba.so", &[]);
        let resolver = NativeResolver::new(loader);

        let err = unsafe {
            resolver.resolve::<Probe>(&names(&["liba.so", "libmissing.so"]), &names(&["probe"]))
        }
        .unwrap_err();

        assert_eq!(err.attempts.len(), 2);
        assert!(err.attempts[0].contains("undefined symbol: probe"));
        assert!(err.attempts[1].starts_with("libmissing.so"));
        assert!(err.to_string().contains("liba.so, libmissing.so"));
    }

    #[test]
    fn test_sibling_lookup() {
        let loader = FakeLoader::new().library(
            "liba.so",
            &[
                ("probe_v1", first_symbol as *const c_void),
                ("probe_v2", second_symbol as *const c_void),
            ],
        );
        let resolver = NativeResolver::new(loader);
        let function =
            unsafe { resolver.resolve::<Probe>(&names(&["liba.so"]), &names(&["probe_v1"])) }
                .unwrap();

        let sibling = unsafe { function.sibling::<Probe>("probe_v2") }.unwrap();
        unsafe { sibling(11) };
        assert_eq!(LAST_CALL.with(Cell::get), (2, 11));
        assert!(unsafe { function.sibling::<Probe>("absent") }.is_none());
    }

    #[test]
    fn test_dynamic_loader_reports_missing_library() {
        let resolver = NativeResolver::default();
        let err = unsafe {
            resolver.resolve::<Probe>(
                &names(&["/nonexistent/libretrofit-test.so"]),
                &names(&["probe"]),
            )
        }
        .unwrap_err();
        assert_eq!(err.attempts.len(), 1);
    }
}
