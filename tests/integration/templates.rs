use std::sync::Arc;

use xdeps_cli::config::OptionSet;
use xdeps_cli::extract::{DependencyRecord, extract_dependencies};
use xdeps_cli::template::{EvaluationContext, Template, TemplateInput};

fn deps(source: &str, options: &str) -> DependencyRecord {
    let ctx = EvaluationContext::new(Arc::new(OptionSet::from_specs([options])));
    let template = Template::parse(TemplateInput::from_arg("srcpkgs/t/template"), source).unwrap();
    extract_dependencies(&template.evaluate(&ctx).unwrap())
}

fn tokens(record: &DependencyRecord, name: &str) -> Vec<String> {
    record.get(name).unwrap_or_else(|| panic!("{name} missing")).to_vec()
}

const GTK_TEMPLATE: &str = r#"# Template file for 'foo'
pkgname=foo
version=3.24.1
revision=2
build_style=gnu-configure
build_options="gir gtk3 ssl"
build_options_default="gir"
desc_option_gtk3="Build the GTK+3 frontend"
configure_args="--disable-static $(vopt_enable gir introspection)
 $(vopt_with ssl openssl)"
hostmakedepends="pkg-config intltool $(vopt_if gir gobject-introspection)"
makedepends="libglib-devel $(vopt_if gtk3 gtk+3-devel gtk+-devel)
 $(vopt_if ssl 'openssl-devel libcrypto-devel')"
depends="desktop-file-utils hicolor-icon-theme"
short_desc="Example application"
maintainer="Someone <someone@example.org>"
license="GPL-2.0-or-later"
homepage="https://example.org/foo"
distfiles="https://example.org/foo-${version}.tar.xz"
checksum=0000000000000000000000000000000000000000000000000000000000000000

_majorver=${version%.*}

case "$XBPS_TARGET_MACHINE" in
	*-musl) makedepends+=" musl-fts-devel";;
esac

post_install() {
	vlicense COPYING
	rm -rf ${DESTDIR}/usr/share/doc
}

foo-devel_package() {
	depends="${sourcepkg}>=${version}_${revision} libglib-devel"
	short_desc+=" - development files"
	pkg_install() {
		vmove usr/include
	}
}
"#;

#[test]
fn test_option_conditional_template() {
    let record = deps(GTK_TEMPLATE, "gir,gtk3");
    assert_eq!(record.keys().collect::<Vec<_>>(), vec!["depends", "hostmakedepends", "makedepends"]);
    assert_eq!(
        tokens(&record, "hostmakedepends"),
        ["pkg-config", "intltool", "gobject-introspection"]
    );
    assert_eq!(tokens(&record, "makedepends"), ["libglib-devel", "gtk+3-devel"]);
    assert_eq!(tokens(&record, "depends"), ["desktop-file-utils", "hicolor-icon-theme"]);
}

#[test]
fn test_option_defaults_off() {
    let record = deps(GTK_TEMPLATE, "ssl");
    assert_eq!(tokens(&record, "hostmakedepends"), ["pkg-config", "intltool"]);
    assert_eq!(
        tokens(&record, "makedepends"),
        ["libglib-devel", "gtk+-devel", "openssl-devel", "libcrypto-devel"]
    );
}

#[test]
fn test_musl_target_case() {
    let source = format!("XBPS_TARGET_MACHINE=x86_64-musl\n{GTK_TEMPLATE}");
    let record = deps(&source, "");
    assert_eq!(tokens(&record, "makedepends"), ["libglib-devel", "gtk+-devel", "musl-fts-devel"]);
}

#[test]
fn test_conditionals_and_parameter_expansion() {
    let record = deps(
        r#"pkgname=python3-foo
version=2.1.0
_pyver=3
depends="python${_pyver}"
if [ "$_pyver" = 3 ]; then
	depends+=" python3-setuptools"
else
	depends+=" python-setuptools"
fi
checkdepends="${depends} python3-pytest>=${version%%.*}"
makedepends="${PYTHON_DEPS:-python3-devel}"
"#,
        "",
    );
    assert_eq!(tokens(&record, "depends"), ["python3", "python3-setuptools"]);
    assert_eq!(
        tokens(&record, "checkdepends"),
        ["python3", "python3-setuptools", "python3-pytest>=2"]
    );
    assert_eq!(tokens(&record, "makedepends"), ["python3-devel"]);
}

#[test]
fn test_loops_and_functions() {
    let record = deps(
        r#"pkgname=meta
_libs() {
	local out=""
	for lib in "$@"; do
		out+=" lib${lib}"
	done
	echo $out
}
depends="$(_libs png jpeg tiff)"
for arch in aarch64 armv7l; do
	case "$arch" in
		aarch64) hostmakedepends="cross-${arch}";;
	esac
done
"#,
        "",
    );
    assert_eq!(tokens(&record, "depends"), ["libpng", "libjpeg", "libtiff"]);
    assert_eq!(tokens(&record, "hostmakedepends"), ["cross-aarch64"]);
}

#[test]
fn test_arrays_and_unrelated_names_excluded() {
    let record = deps(
        r#"pkgname=foo
depends=(a b c)
declare -A optdepends
optdepends[x]=y
lib32depends="glibc"
makedepends=""
depends_note="not a dependency list"
"#,
        "",
    );
    assert_eq!(record.keys().collect::<Vec<_>>(), vec!["lib32depends", "makedepends"]);
    assert!(tokens(&record, "makedepends").is_empty());
}

#[test]
fn test_vopt_arity_errors_abort() {
    let ctx = EvaluationContext::default();
    let template = Template::parse(
        TemplateInput::from_arg("t"),
        "pkgname=foo\nconfigure_args=\"$(vopt_with)\"\n",
    )
    .unwrap();
    let err = template.evaluate(&ctx).unwrap_err();
    assert!(format!("{err:#}").contains("vopt_with: expected 1..2 arguments, got 0"));
}
