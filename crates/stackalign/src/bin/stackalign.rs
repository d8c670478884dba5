use std::path::PathBuf;
use std::sync::Arc;

use argh::FromArgs;
use stackalign::io::tiff::write_image_tiff_mono16;
use stackalign::io::{ImageSource, RawImageSource, TiffImageSource};
use stackalign::models::TranslationModel2d;
use stackalign::{align_sections, discover_sections, AlignConfig, AlignError, AlignedVolumeView, ImageLoader};

/// Aligns a series of serial section images
#[derive(Debug, FromArgs)]
struct Args {
    /// directory with the section images
    #[argh(option, short = 's')]
    src_dir: PathBuf,

    /// directory for correspondences and transforms
    #[argh(option, short = 't')]
    target_dir: PathBuf,

    /// file name suffix of the section images
    #[argh(option, default = "String::from(\".tif\")")]
    suffix: String,

    /// JSON configuration file
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// width of raw 16-bit images, read as TIFF if absent
    #[argh(option)]
    raw_width: Option<usize>,

    /// height of raw 16-bit images
    #[argh(option)]
    raw_height: Option<usize>,

    /// header bytes of raw images
    #[argh(option, default = "0")]
    raw_header: usize,

    /// directory to export the aligned sections to as TIFF
    #[argh(option, short = 'e')]
    export_dir: Option<PathBuf>,

    /// name of the transform table
    #[argh(option, default = "String::from(\"transforms\")")]
    run_name: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Args = argh::from_env();

    let mut config = match &args.config {
        Some(path) => AlignConfig::from_json_file(path)?,
        None => AlignConfig::default(),
    };

    let source: Arc<dyn ImageSource> = match (args.raw_width, args.raw_height) {
        (Some(width), Some(height)) => {
            let size = [width, height].into();
            config.dimensions = config.dimensions.or(Some(size));
            Arc::new(RawImageSource {
                header: args.raw_header,
                ..RawImageSource::new(size)
            })
        }
        (None, None) => Arc::new(TiffImageSource),
        _ => return Err("--raw-width and --raw-height must be given together".into()),
    };

    let paths = discover_sections(&args.src_dir, &args.suffix)?;
    log::info!("found {} sections in {}", paths.len(), args.src_dir.display());

    let loader = Arc::new(ImageLoader::new(source, &config.cache));
    let models = align_sections::<TranslationModel2d>(
        &paths,
        loader.clone(),
        &config,
        &args.target_dir,
        &args.run_name,
    )?;

    if let Some(export_dir) = &args.export_dir {
        std::fs::create_dir_all(export_dir)?;
        let tile_size = match config.dimensions {
            Some(size) => size,
            None => loader.load(&paths[0])?.size(),
        };

        let view = AlignedVolumeView::new(loader, paths.clone(), &models, tile_size)?;
        view.par_for_each_tile(|index, tile| -> Result<(), AlignError> {
            let stem = paths[index].file_stem().unwrap_or_default().to_string_lossy();
            let path = export_dir.join(format!("{stem}.tif"));
            write_image_tiff_mono16(&path, tile)?;
            Ok(())
        })?;
        log::info!("exported {} sections to {}", view.len(), export_dir.display());
    }

    Ok(())
}
